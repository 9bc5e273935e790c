//! # Redo Manager Errors

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::writer::WriterError;

/// Result type for manager operations
pub type RedoResult<T> = Result<T, RedoError>;

/// Flush cycle step a writer error happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPhase {
    WriteLog,
    FlushLog,
    SaveMeta,
}

impl FlushPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushPhase::WriteLog => "WriteLog",
            FlushPhase::FlushLog => "FlushLog",
            FlushPhase::SaveMeta => "SaveMeta",
        }
    }
}

impl fmt::Display for FlushPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum RedoError {
    /// The manager failed or was cleaned up
    #[error("redo manager is closed")]
    Closed,

    #[error("redo writer failed in {phase}: {source}")]
    Writer {
        phase: FlushPhase,
        #[source]
        source: WriterError,
    },

    /// Writer could not be opened or released
    #[error("redo writer unavailable: {0}")]
    Storage(#[source] WriterError),

    #[error("invalid redo config: {0}")]
    Config(#[from] ConfigError),

    #[error("redo runtime error: {0}")]
    Runtime(String),
}

impl RedoError {
    pub fn writer(phase: FlushPhase, source: WriterError) -> Self {
        RedoError::Writer { phase, source }
    }

    /// Phase of a writer failure
    pub fn phase(&self) -> Option<FlushPhase> {
        match self {
            RedoError::Writer { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            RedoError::Closed => "REDO_MANAGER_CLOSED",
            RedoError::Writer { phase, .. } => match phase {
                FlushPhase::WriteLog => "REDO_WRITE_LOG_FAILED",
                FlushPhase::FlushLog => "REDO_FLUSH_LOG_FAILED",
                FlushPhase::SaveMeta => "REDO_SAVE_META_FAILED",
            },
            RedoError::Storage(_) => "REDO_STORAGE_UNAVAILABLE",
            RedoError::Config(_) => "REDO_CONFIG_INVALID",
            RedoError::Runtime(_) => "REDO_RUNTIME_ERROR",
        }
    }
}
