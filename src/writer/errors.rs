//! # Writer Errors
//!
//! Backend errors (I/O, object storage, injected backend faults) are told
//! apart from logical errors (closed writer, codec, corruption) by
//! [`WriterError::is_backend`].

use std::io;

use thiserror::Error;

/// Result type for writer operations
pub type WriterResult<T> = Result<T, WriterError>;

/// Redo log writer errors
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("invalid black hole writer")]
    InvalidBlackHole,

    #[error("Writer closed")]
    Closed,

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Corrupted redo log {location}: {reason}")]
    Corruption { location: String, reason: String },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

// io::Error is not Clone; a clone keeps its kind and message
impl Clone for WriterError {
    fn clone(&self) -> Self {
        match self {
            WriterError::Io { context, source } => WriterError::Io {
                context: context.clone(),
                source: io::Error::new(source.kind(), source.to_string()),
            },
            WriterError::Storage(msg) => WriterError::Storage(msg.clone()),
            WriterError::ObjectNotFound(key) => WriterError::ObjectNotFound(key.clone()),
            WriterError::InvalidBlackHole => WriterError::InvalidBlackHole,
            WriterError::Closed => WriterError::Closed,
            WriterError::Codec(msg) => WriterError::Codec(msg.clone()),
            WriterError::Corruption { location, reason } => WriterError::Corruption {
                location: location.clone(),
                reason: reason.clone(),
            },
            WriterError::LockPoisoned(what) => WriterError::LockPoisoned(what),
        }
    }
}

impl WriterError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        WriterError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corruption(location: impl Into<String>, reason: impl Into<String>) -> Self {
        WriterError::Corruption {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from the storage backend rather than from
    /// misuse or bad data
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            WriterError::Io { .. }
                | WriterError::Storage(_)
                | WriterError::ObjectNotFound(_)
                | WriterError::InvalidBlackHole
        )
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            WriterError::Io { .. } => "REDO_WRITER_IO",
            WriterError::Storage(_) => "REDO_WRITER_STORAGE",
            WriterError::ObjectNotFound(_) => "REDO_WRITER_NOT_FOUND",
            WriterError::InvalidBlackHole => "REDO_WRITER_INJECTED_FAULT",
            WriterError::Closed => "REDO_WRITER_CLOSED",
            WriterError::Codec(_) => "REDO_WRITER_CODEC",
            WriterError::Corruption { .. } => "REDO_LOG_CORRUPTION",
            WriterError::LockPoisoned(_) => "REDO_WRITER_LOCK_POISONED",
        }
    }
}
