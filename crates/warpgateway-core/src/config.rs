//! Gateway configuration.
//!
//! Loaded from a YAML file (default `config.yaml`). Every section and field
//! has a default, so a partial file only overrides what it names and a
//! missing file yields the built-in configuration.
//!
//! ```yaml
//! proxy:
//!   host: 0.0.0.0
//!   port: 8080
//!   upstream_routes:
//!     - pattern: "openai.com"
//!       upstream: "http://127.0.0.1:7890"
//! rules:
//!   match_kind: contains
//!   block: ["ads.example.com"]
//! streaming:
//!   paths: ["/stream"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::logger::DEFAULT_LOG_DIR;
use crate::rules::MatchKind;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Default listen host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub proxy: ProxySettings,
    pub rules: RulesConfig,
    pub streaming: StreamingConfig,
    pub logging: LoggingConfig,
}

/// Listener and upstream settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Address to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Skip upstream certificate verification.
    pub ssl_insecure: bool,
    /// Directory holding the root CA. Platform data directory when unset.
    pub cert_dir: Option<PathBuf>,
    /// Default upstream proxy, empty for direct connections.
    #[serde(deserialize_with = "nullable")]
    pub upstream: String,
    /// Conditional upstream routes, checked in order.
    #[serde(deserialize_with = "nullable")]
    pub upstream_routes: Vec<UpstreamRoute>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ssl_insecure: false,
            cert_dir: None,
            upstream: String::new(),
            upstream_routes: Vec::new(),
        }
    }
}

/// Routes URLs containing `pattern` to a specific upstream proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamRoute {
    pub pattern: String,
    pub upstream: String,
}

/// Block, allow, and log-only pattern lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Match kind applied to every pattern in the lists.
    pub match_kind: MatchKind,
    #[serde(deserialize_with = "nullable")]
    pub block: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub allow: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub log_only: Vec<String>,
}

/// Path substrings whose responses are delivered incrementally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    #[serde(deserialize_with = "nullable")]
    pub paths: Vec<String>,
}

/// Diagnostic logging and request log settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level name (`DEBUG`, `INFO`, `WARNING`, ...).
    pub level: String,
    /// Diagnostic log file, empty to disable.
    #[serde(deserialize_with = "nullable")]
    pub file: String,
    /// Also log to the console.
    pub console: bool,
    /// Directory for JSONL request logs.
    pub request_log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "warp_gateway.log".to_string(),
            console: true,
            request_log_dir: PathBuf::from(DEFAULT_LOG_DIR),
        }
    }
}

impl LoggingConfig {
    /// Maps the configured level name to a `tracing` filter directive.
    pub fn tracing_level(&self) -> &'static str {
        tracing_level(&self.level)
    }
}

/// Maps a level name (`DEBUG`, `WARNING`, `critical`, ...) to a `tracing`
/// filter directive. Unknown names map to `info`.
pub fn tracing_level(name: &str) -> &'static str {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}

/// Where a loaded configuration came from.
#[derive(Debug)]
pub enum ConfigSource {
    /// Parsed from the file.
    File(PathBuf),
    /// The file does not exist; defaults are in use.
    Missing(PathBuf),
    /// The file could not be read or parsed; defaults are in use.
    Invalid(PathBuf, ConfigError),
}

impl ConfigSource {
    /// Returns true if the defaults replaced a file that failed to load.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(..))
    }

    /// One-line description for the startup log.
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => format!("Config file: {}", path.display()),
            Self::Missing(path) => {
                format!("Config file {} not found, using defaults", path.display())
            }
            Self::Invalid(path, e) => {
                format!("Failed to load config {}: {}, using defaults", path.display(), e)
            }
        }
    }

    /// Logs the description, as a warning when the file was unusable.
    pub fn report(&self) {
        if self.is_invalid() {
            tracing::warn!("{}", self.describe());
        } else {
            tracing::info!("{}", self.describe());
        }
    }
}

/// Treats an explicit YAML `null` (e.g. `block:` with no items) as the default.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl GatewayConfig {
    /// Loads configuration, falling back to defaults on any failure.
    ///
    /// Nothing is logged here; the returned [`ConfigSource`] is reported once
    /// logging is up.
    pub fn load(path: impl AsRef<Path>) -> (Self, ConfigSource) {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return (Self::default(), ConfigSource::Missing(path));
        }

        match Self::from_file(&path) {
            Ok(config) => (config, ConfigSource::File(path)),
            Err(e) => (Self::default(), ConfigSource::Invalid(path, e)),
        }
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parses configuration from YAML text. An empty document yields defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str::<Option<Self>>(content)?.unwrap_or_default())
    }

    /// Serializes the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Returns the `host:port` listen address.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.proxy.host, self.proxy.port)
    }

    /// Returns the upstream proxy for a URL.
    ///
    /// The first route whose non-empty pattern occurs in the URL wins;
    /// otherwise the default upstream (possibly empty) is returned.
    pub fn upstream_for_url(&self, url: &str) -> &str {
        self.proxy
            .upstream_routes
            .iter()
            .find(|route| !route.pattern.is_empty() && url.contains(route.pattern.as_str()))
            .map(|route| route.upstream.as_str())
            .unwrap_or(self.proxy.upstream.as_str())
    }
}
