//! Redo configuration
//!
//! The consistency level and storage target are fixed when a manager is
//! constructed. Disabling redo is a construction-time choice (level `none`
//! selects the discard writer), never a runtime toggle.

mod consistent;
mod errors;
mod storage;

pub use consistent::{
    is_consistent_enabled, is_valid_consistent_level, ConsistentConfig, ConsistentLevel,
    DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_GC_INTERVAL_MS, DEFAULT_MAX_LOG_SIZE_MB,
    MIN_FLUSH_INTERVAL_MS,
};
pub use errors::{ConfigError, ConfigResult};
pub use storage::{is_external_storage, is_valid_consistent_storage, StorageScheme, StorageUri};
