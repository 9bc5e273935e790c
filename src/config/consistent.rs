//! Consistency configuration
//!
//! Loaded from JSON like the rest of the pipeline configuration. Optional
//! fields fall back to defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{ConfigError, ConfigResult};
use super::storage::{StorageScheme, StorageUri};

/// Default flush interval of the redo manager.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2000;

/// Smallest accepted flush interval.
pub const MIN_FLUSH_INTERVAL_MS: u64 = 50;

/// Default interval of the log GC loop.
pub const DEFAULT_GC_INTERVAL_MS: u64 = 5000;

/// Default segment size before rotation.
pub const DEFAULT_MAX_LOG_SIZE_MB: u64 = 64;

/// Consistency level of a changefeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsistentLevel {
    /// Redo logging disabled
    None,
    /// Redo logging enabled; downstream converges to a consistent state
    Eventual,
}

impl ConsistentLevel {
    /// Parse a level name. Matching is exact; `NONE` is rejected.
    pub fn parse(level: &str) -> Option<Self> {
        match level {
            "none" => Some(Self::None),
            "eventual" => Some(Self::Eventual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Eventual => "eventual",
        }
    }
}

/// Whether `level` is a recognised consistency level.
pub fn is_valid_consistent_level(level: &str) -> bool {
    ConsistentLevel::parse(level).is_some()
}

/// Whether `level` turns redo logging on. Unknown levels do not.
pub fn is_consistent_enabled(level: &str) -> bool {
    ConsistentLevel::parse(level) == Some(ConsistentLevel::Eventual)
}

/// Redo configuration of one changefeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistentConfig {
    /// `none` or `eventual`
    pub level: String,

    /// Storage URI, e.g. `local:///data/redo` or `blackhole://`
    #[serde(default = "default_storage")]
    pub storage: String,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,

    #[serde(default = "default_max_log_size_mb")]
    pub max_log_size_mb: u64,
}

fn default_storage() -> String {
    "blackhole://".to_string()
}
fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}
fn default_gc_interval_ms() -> u64 {
    DEFAULT_GC_INTERVAL_MS
}
fn default_max_log_size_mb() -> u64 {
    DEFAULT_MAX_LOG_SIZE_MB
}

impl Default for ConsistentConfig {
    fn default() -> Self {
        Self {
            level: ConsistentLevel::None.as_str().to_string(),
            storage: default_storage(),
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            gc_interval_ms: DEFAULT_GC_INTERVAL_MS,
            max_log_size_mb: DEFAULT_MAX_LOG_SIZE_MB,
        }
    }
}

impl ConsistentConfig {
    /// Enabled configuration writing to `storage`.
    pub fn eventual(storage: impl Into<String>) -> Self {
        Self {
            level: ConsistentLevel::Eventual.as_str().to_string(),
            storage: storage.into(),
            ..Self::default()
        }
    }

    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }

    pub fn with_gc_interval_ms(mut self, ms: u64) -> Self {
        self.gc_interval_ms = ms;
        self
    }

    pub fn with_max_log_size_mb(mut self, mb: u64) -> Self {
        self.max_log_size_mb = mb;
        self
    }

    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        let config: ConsistentConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every field
    pub fn validate(&self) -> ConfigResult<()> {
        self.consistent_level()?;
        self.storage_uri()?;

        if self.flush_interval_ms < MIN_FLUSH_INTERVAL_MS {
            return Err(ConfigError::FlushIntervalTooSmall(
                self.flush_interval_ms,
                MIN_FLUSH_INTERVAL_MS,
            ));
        }
        if self.gc_interval_ms == 0 {
            return Err(ConfigError::ZeroGcInterval);
        }
        if self.max_log_size_mb == 0 {
            return Err(ConfigError::ZeroMaxLogSize);
        }
        Ok(())
    }

    pub fn consistent_level(&self) -> ConfigResult<ConsistentLevel> {
        ConsistentLevel::parse(&self.level).ok_or_else(|| ConfigError::InvalidLevel(self.level.clone()))
    }

    pub fn storage_uri(&self) -> ConfigResult<StorageUri> {
        StorageUri::parse(&self.storage)
    }

    /// Whether the configuration enables redo logging.
    ///
    /// Level `eventual` with a `blackhole://` target is still enabled: the
    /// manager runs its loops against the discard writer.
    pub fn is_enabled(&self) -> bool {
        is_consistent_enabled(&self.level)
    }

    /// Whether the storage target discards everything.
    pub fn is_blackhole(&self) -> bool {
        self.storage_uri()
            .map(|u| u.scheme() == StorageScheme::BlackHole)
            .unwrap_or(false)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn max_log_size_bytes(&self) -> u64 {
        self.max_log_size_mb.saturating_mul(1024 * 1024)
    }
}
