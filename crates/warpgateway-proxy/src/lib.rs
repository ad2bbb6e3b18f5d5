//! WarpGateway Proxy - hudsucker host for the interceptor chain.
//!
//! This crate runs the MITM proxy that Warp (or any client) is pointed at and
//! feeds every intercepted request and response through the
//! [`InterceptorChain`](warpgateway_core::InterceptorChain) from
//! `warpgateway-core`.
//!
//! ## Architecture
//!
//! ```text
//! Client ──► hudsucker Proxy ──► GatewayHandler ──► InterceptorChain
//!                                     │
//!                    ┌────────────────┼──────────────────┐
//!                    │ no response    │ streaming mark    │ synthesized
//!                    ▼                ▼                   ▼
//!              forward upstream  forward, pass body   answer client
//!                                 through unbuffered   (e.g. 403)
//! ```
//!
//! TLS interception uses a root CA generated on first run; see [`CaManager`].
//! The [`trust`] functions add it to the operating system trust store.
//! Upstream connections go through the rustls client in [`tls`].

mod ca;
mod error;
mod handler;
mod proxy;
pub mod tls;
pub mod trust;

pub use ca::{CaManager, CaManagerError};
pub use error::{ProxyError, Result};
pub use handler::{headers_to_map, request_url, to_hyper_response, GatewayHandler};
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer};
pub use trust::{install_ca_certificate, is_ca_installed, uninstall_ca_certificate, TrustResult};
