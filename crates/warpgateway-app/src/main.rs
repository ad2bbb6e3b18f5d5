//! WarpGateway - traffic filter for the Warp terminal.
//!
//! Runs the MITM proxy with the default interceptor chain
//! (`TrafficFilter`, `RequestLogger`, `StatsCollector`) until Ctrl-C, then
//! prints the collected statistics. The `warp` subcommand controls the Warp
//! terminal itself, and `cert` manages trust of the interception CA.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use warpgateway_core::config::{tracing_level, DEFAULT_CONFIG_FILE};
use warpgateway_core::{
    BlockCounter, ConfigSource, GatewayConfig, InterceptorChain, LoggingConfig, RequestLogger,
    StatsCollector, TrafficFilter, WarpLocator,
};
use warpgateway_proxy::{trust, CaManager, ProxyConfig, ProxyServer};

/// WarpGateway - filter and observe Warp terminal traffic
#[derive(Parser, Debug)]
#[command(name = "warpgateway", version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Listen host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Do not print statistics on shutdown
    #[arg(long)]
    no_stats: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Set log level (trace, debug, info, warning, error), overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Path to the Warp executable
    #[arg(long)]
    warp_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Control the Warp terminal
    Warp {
        #[command(subcommand)]
        action: WarpAction,
    },
    /// Manage the interception CA certificate
    Cert {
        #[command(subcommand)]
        action: CertAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum WarpAction {
    /// Start Warp
    Launch,
    /// Terminate running Warp processes
    Kill,
    /// Kill and start Warp again
    Restart,
    /// Show whether Warp is installed and running
    Status,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum CertAction {
    /// Generate the CA if needed and add it to the system trust store
    Install,
    /// Show the CA location and whether it is trusted
    Status,
    /// Remove the CA from the system trust store
    Uninstall,
}

impl Args {
    /// Applies command-line overrides to the loaded configuration.
    fn apply_overrides(&self, config: &mut GatewayConfig) {
        if let Some(host) = &self.host {
            config.proxy.host = host.clone();
        }
        if let Some(port) = self.port {
            config.proxy.port = port;
        }
    }

    /// Returns the tracing level for the `warpgateway` targets.
    fn log_level(&self, logging: &LoggingConfig) -> &'static str {
        if self.debug {
            "debug"
        } else if let Some(level) = &self.log_level {
            tracing_level(level)
        } else {
            logging.tracing_level()
        }
    }

    fn warp_locator(&self) -> WarpLocator {
        match &self.warp_path {
            Some(path) => WarpLocator::new().with_override(path),
            None => WarpLocator::new(),
        }
    }
}

/// Initialize logging to the console and the configured log file.
fn init_logging(args: &Args, logging: &LoggingConfig) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warpgateway={},warn", args.log_level(logging))));

    let console_layer = logging
        .console
        .then(|| fmt::layer().with_writer(std::io::stdout));

    let (file_layer, guard) = match file_appender(&logging.file) {
        Some(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(non_blocking).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

/// Opens the diagnostic log file, if one is configured.
fn file_appender(file: &str) -> Option<RollingFileAppender> {
    if file.is_empty() {
        return None;
    }

    let path = Path::new(file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path.file_name()?.to_string_lossy().into_owned();

    match RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
    {
        Ok(appender) => Some(appender),
        Err(e) => {
            eprintln!("File logging unavailable ({}): {}", file, e);
            None
        }
    }
}

/// The default interceptor chain and the members the binary reads back.
struct Gateway {
    chain: Arc<InterceptorChain>,
    filter: Arc<TrafficFilter>,
    stats: Arc<StatsCollector>,
}

/// Builds `TrafficFilter`, `RequestLogger`, `StatsCollector` in that order.
///
/// A logger that cannot open its file is left out rather than failing startup.
fn build_gateway(config: &GatewayConfig) -> anyhow::Result<Gateway> {
    let blocked = BlockCounter::new();
    let filter = Arc::new(TrafficFilter::from_config(
        &config.rules,
        &config.streaming,
        blocked.clone(),
    )?);
    let stats = Arc::new(StatsCollector::new(blocked));

    let chain = InterceptorChain::new().with(filter.clone());
    match RequestLogger::new(&config.logging.request_log_dir) {
        Ok(logger) => chain.add(Arc::new(logger)),
        Err(e) => tracing::error!(
            "Request logging disabled, cannot open {}: {}",
            config.logging.request_log_dir.display(),
            e
        ),
    }
    chain.add(stats.clone());

    Ok(Gateway {
        chain: Arc::new(chain),
        filter,
        stats,
    })
}

fn log_banner(config: &GatewayConfig, gateway: &Gateway) {
    tracing::info!("{}", "=".repeat(60));
    tracing::info!("WarpGateway starting");
    tracing::info!("Listen address: {}", config.listen_addr());
    tracing::info!(
        "Rules: {} block, {} allow, {} log_only ({} matching)",
        gateway.filter.block_matcher().len(),
        gateway.filter.allow_matcher().len(),
        gateway.filter.log_only_matcher().len(),
        config.rules.match_kind
    );
    if !gateway.filter.streaming_paths().is_empty() {
        tracing::info!("Streaming paths: {:?}", gateway.filter.streaming_paths());
    }
    tracing::info!("Interceptors: {}", gateway.chain.names().join(" -> "));

    if !config.proxy.upstream.is_empty() {
        tracing::info!("Upstream proxy: {}", config.proxy.upstream);
    }
    for route in &config.proxy.upstream_routes {
        tracing::info!("Upstream route: {} -> {}", route.pattern, route.upstream);
    }
    if config.proxy.ssl_insecure {
        tracing::warn!("ssl_insecure is set; upstream certificates are not verified");
    }
    tracing::info!("{}", "=".repeat(60));
}

/// Statistics printed on shutdown, header included.
fn shutdown_report(gateway: &Gateway) -> Vec<String> {
    gateway.stats.snapshot().summary_lines()
}

async fn run_gateway(args: &Args, config: GatewayConfig) -> anyhow::Result<()> {
    let gateway = build_gateway(&config)?;
    log_banner(&config, &gateway);

    let proxy_config = ProxyConfig::from_settings(&config.proxy)?;
    let server = ProxyServer::new(proxy_config, gateway.chain.clone())?;
    tracing::info!(
        "Install the CA certificate for HTTPS interception: {}",
        server.ca_cert_path().display()
    );

    let mut handle = server.start()?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutting down...");
        }
        _ = handle.stopped() => {
            anyhow::bail!("proxy on {} stopped unexpectedly", config.listen_addr());
        }
    }

    if !args.no_stats {
        for line in shutdown_report(&gateway) {
            tracing::info!("{}", line);
        }
    }

    handle.stop().await;
    tracing::info!("WarpGateway stopped");
    Ok(())
}

fn run_warp(locator: &WarpLocator, action: WarpAction) -> anyhow::Result<()> {
    match action {
        WarpAction::Launch => {
            locator.launch()?;
        }
        WarpAction::Kill => locator.kill()?,
        WarpAction::Restart => {
            locator.restart()?;
        }
        WarpAction::Status => {
            if locator.is_installed() {
                println!("Warp installed: {}", locator.resolve().display());
                if locator.is_running() {
                    println!("Warp is running");
                } else {
                    println!("Warp is not running");
                }
            } else {
                println!("Warp is not installed (looked for {})", locator.resolve().display());
            }
        }
    }
    Ok(())
}

fn run_cert(config: &GatewayConfig, action: CertAction) -> anyhow::Result<()> {
    let ca = CaManager::from_dir_or_default(config.proxy.cert_dir.as_deref())?;
    let cert_path = ca.cert_path();

    let result = match action {
        CertAction::Install => {
            ca.ensure_ca()?;
            trust::install_ca_certificate(&cert_path)
        }
        CertAction::Uninstall => trust::uninstall_ca_certificate(&cert_path),
        CertAction::Status => {
            println!("CA certificate: {}", cert_path.display());
            if !ca.ca_exists() {
                println!("CA has not been generated yet");
            } else if trust::is_ca_installed(&cert_path) {
                println!("CA is trusted by the system");
            } else {
                println!("CA is not in the system trust store");
            }
            return Ok(());
        }
    };

    println!("{}", result.message);
    if !result.success {
        anyhow::bail!(
            "trust store update failed; manage {} manually",
            cert_path.display()
        );
    }
    Ok(())
}

/// Loads the configuration and applies command-line overrides.
fn load_config(args: &Args) -> (GatewayConfig, ConfigSource) {
    let (mut config, source) = GatewayConfig::load(&args.config);
    args.apply_overrides(&mut config);
    (config, source)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (config, source) = load_config(&args);

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_logging(&args, &config.logging);
    source.report();

    match args.command {
        Some(Command::Warp { action }) => run_warp(&args.warp_locator(), action),
        Some(Command::Cert { action }) => run_cert(&config, action),
        None => run_gateway(&args, config).await,
    }
}
