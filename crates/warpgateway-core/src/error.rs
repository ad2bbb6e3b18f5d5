//! Error types for the gateway core.

use thiserror::Error;

/// Rule construction error.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The pattern could not be compiled into a regular expression.
    #[error("invalid {kind} pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern as written in the configuration.
        pattern: String,
        /// The match kind the pattern was declared with.
        kind: &'static str,
        /// The underlying regex compilation error.
        #[source]
        source: regex::Error,
    },
}

/// Configuration loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Request log error.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// IO error while creating or writing the log file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize a log record.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Warp terminal management error.
#[derive(Debug, Error)]
pub enum WarpError {
    /// The Warp executable does not exist at the resolved path.
    #[error("Warp is not installed at {0}")]
    NotInstalled(std::path::PathBuf),

    /// Failed to spawn or signal the Warp process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
