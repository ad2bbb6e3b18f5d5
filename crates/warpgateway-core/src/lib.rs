//! WarpGateway Core - Rule matching and the interception pipeline.
//!
//! This crate holds everything the gateway decides about traffic, independent
//! of the proxy engine that carries it. The proxy crate turns intercepted HTTP
//! messages into [`Flow`]s and hands them to an [`InterceptorChain`].
//!
//! ## Pipeline
//!
//! ```text
//! request ──► TrafficFilter ──► RequestLogger ──► StatsCollector
//!                  │
//!                  └─ block: 403 written, rest of request phase skipped
//!
//! response ─► TrafficFilter ──► RequestLogger ──► StatsCollector
//! ```
//!
//! ## Modules
//!
//! - [`rules`]: patterns and match strategies
//! - [`flow`]: the request/response record shared by interceptors
//! - [`interceptor`]: the interceptor trait and the ordered chain
//! - [`filter`]: block/allow/log-only/streaming policy
//! - [`stats`]: running counters
//! - [`logger`]: JSONL request log
//! - [`config`]: YAML configuration
//! - [`warp`]: Warp terminal discovery and process control

pub mod config;
pub mod error;
pub mod filter;
pub mod flow;
pub mod interceptor;
pub mod logger;
pub mod rules;
pub mod stats;
pub mod warp;

pub use config::{
    ConfigSource, GatewayConfig, LoggingConfig, ProxySettings, RulesConfig, StreamingConfig,
    UpstreamRoute,
};
pub use error::{ConfigError, LoggerError, RuleError, WarpError};
pub use filter::{FilterOutcome, FilterVerdict, TrafficFilter};
pub use flow::{Flow, FlowRequest, FlowResponse, Headers};
pub use interceptor::{Decision, Interceptor, InterceptorChain, InterceptorToggle};
pub use logger::{LogRecord, RecordKind, RequestLogger};
pub use rules::{MatchKind, Rule, RuleMatcher};
pub use stats::{BlockCounter, CounterMap, StatsCollector, StatsSnapshot};
pub use warp::WarpLocator;
