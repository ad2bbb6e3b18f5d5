//! MITM proxy server.
//!
//! Wraps a hudsucker [`Proxy`] around a [`GatewayHandler`]. The server can
//! run in the foreground ([`ProxyServer::run`]) or as a background task
//! controlled through a [`ProxyHandle`].

use std::future::Pending;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use hudsucker::certificate_authority::RcgenAuthority;
use hudsucker::tokio_tungstenite::Connector;
use hudsucker::{NoopHandler, Proxy};
use tokio::sync::broadcast;

use warpgateway_core::{InterceptorChain, ProxySettings};

use crate::ca::CaManager;
use crate::error::{ProxyError, Result};
use crate::handler::GatewayHandler;
use crate::tls::{self, UpstreamConnector};

type GatewayProxy =
    Proxy<UpstreamConnector, RcgenAuthority, GatewayHandler, NoopHandler, Pending<()>>;

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// The CA manager for certificate generation.
    pub ca_manager: CaManager,
    /// Accept any upstream certificate.
    pub ssl_insecure: bool,
}

impl ProxyConfig {
    /// Creates a configuration from the `proxy` section of the gateway config.
    pub fn from_settings(settings: &ProxySettings) -> Result<Self> {
        let addr = resolve_addr(&settings.host, settings.port)?;
        let ca_manager = CaManager::from_dir_or_default(settings.cert_dir.as_deref())?;
        Ok(Self {
            addr,
            ca_manager,
            ssl_insecure: settings.ssl_insecure,
        })
    }

    /// Sets the port, keeping the host.
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Turns upstream certificate verification off or on.
    pub fn with_ssl_insecure(mut self, ssl_insecure: bool) -> Self {
        self.ssl_insecure = ssl_insecure;
        self
    }
}

fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| ProxyError::InvalidAddress(format!("{host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| ProxyError::InvalidAddress(format!("{host}:{port}")))
}

/// MITM proxy server feeding intercepted traffic into an interceptor chain.
pub struct ProxyServer {
    config: ProxyConfig,
    chain: Arc<InterceptorChain>,
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("config", &self.config)
            .field("interceptors", &self.chain.names())
            .finish()
    }
}

impl ProxyServer {
    /// Creates a server, generating the root CA if it does not exist yet.
    pub fn new(config: ProxyConfig, chain: Arc<InterceptorChain>) -> Result<Self> {
        config.ca_manager.ensure_ca()?;
        Ok(Self { config, chain })
    }

    /// Returns the address the proxy is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Returns the CA certificate path for user installation.
    pub fn ca_cert_path(&self) -> std::path::PathBuf {
        self.config.ca_manager.cert_path()
    }

    pub fn chain(&self) -> &Arc<InterceptorChain> {
        &self.chain
    }

    /// Loads the CA and upstream TLS client, then assembles the hudsucker proxy.
    fn build(&self) -> Result<GatewayProxy> {
        let authority = self.config.ca_manager.ensure_ca()?;
        let tls_config = tls::client_config(self.config.ssl_insecure)?;
        if self.config.ssl_insecure {
            tracing::warn!("Upstream certificate verification is disabled (ssl_insecure)");
        }

        Proxy::builder()
            .with_addr(self.config.addr)
            .with_ca(authority)
            .with_http_connector(tls::upstream_connector(tls_config.clone()))
            .with_websocket_connector(Connector::Rustls(Arc::new(tls_config)))
            .with_http_handler(GatewayHandler::new(self.chain.clone()))
            .build()
            .map_err(|e| ProxyError::Proxy(e.to_string()))
    }

    /// Runs the proxy until it fails.
    pub async fn run(self) -> Result<()> {
        let proxy = self.build()?;

        tracing::info!("Starting MITM proxy on {}", self.config.addr);
        tracing::info!("CA certificate: {}", self.ca_cert_path().display());

        proxy
            .start()
            .await
            .map_err(|e| ProxyError::Proxy(e.to_string()))?;

        tracing::info!("Proxy server stopped");
        Ok(())
    }

    /// Starts the proxy in the background.
    ///
    /// Returns a handle that can be used to stop the server.
    pub fn start(self) -> Result<ProxyHandle> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let shutdown_tx_clone = shutdown_tx.clone();
        let addr = self.config.addr;

        // Build before spawning so CA and TLS errors reach the caller.
        let proxy = self.build()?;

        tracing::info!("Starting MITM proxy on {}", addr);

        let mut shutdown_rx = shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                result = proxy.start() => {
                    if let Err(e) = result {
                        tracing::error!("Proxy error: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Proxy shutdown signal received");
                }
            };
        });

        Ok(ProxyHandle {
            shutdown_tx: shutdown_tx_clone,
            addr,
            handle,
        })
    }
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the proxy to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Resolves when the proxy task ends on its own (e.g. the listener failed).
    ///
    /// The handle must not be waited on or stopped after this resolves.
    pub async fn stopped(&mut self) {
        let _ = (&mut self.handle).await;
    }

    /// Waits for the proxy to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}
