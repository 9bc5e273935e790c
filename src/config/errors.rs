//! # Configuration Errors

use thiserror::Error;

/// Result type for configuration handling
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid consistent level: '{0}'")]
    InvalidLevel(String),

    #[error("Invalid storage URI: '{0}'")]
    InvalidStorageUri(String),

    #[error("Unsupported storage scheme: '{0}'")]
    UnsupportedScheme(String),

    #[error("Flush interval {0}ms is below the minimum of {1}ms")]
    FlushIntervalTooSmall(u64, u64),

    #[error("GC interval must be > 0")]
    ZeroGcInterval,

    #[error("max_log_size_mb must be > 0")]
    ZeroMaxLogSize,

    #[error("No object store registered for storage '{0}'")]
    MissingObjectStore(String),

    #[error("Failed to read config: {0}")]
    Read(String),

    #[error("Invalid config JSON: {0}")]
    Parse(String),
}

impl ConfigError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        "REDO_CONFIG_INVALID"
    }
}
