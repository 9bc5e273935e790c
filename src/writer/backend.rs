//! # Redo Log Writer Trait

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Ts;

use super::errors::WriterResult;
use super::record::RedoRecord;

/// Progress persisted next to the segments of one changefeed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMeta {
    pub checkpoint_ts: Ts,
    pub resolved_ts: Ts,
}

impl LogMeta {
    pub fn new(checkpoint_ts: Ts, resolved_ts: Ts) -> Self {
        Self {
            checkpoint_ts,
            resolved_ts,
        }
    }

    /// Field-wise maximum, so persisted meta never moves backwards
    pub fn merge(&self, other: &LogMeta) -> LogMeta {
        LogMeta {
            checkpoint_ts: self.checkpoint_ts.max(other.checkpoint_ts),
            resolved_ts: self.resolved_ts.max(other.resolved_ts),
        }
    }

    /// Field-wise minimum: progress both sides have reached
    pub fn lower(&self, other: &LogMeta) -> LogMeta {
        LogMeta {
            checkpoint_ts: self.checkpoint_ts.min(other.checkpoint_ts),
            resolved_ts: self.resolved_ts.min(other.resolved_ts),
        }
    }
}

/// Durable destination of redo records.
///
/// Implementations use interior mutability: one writer may be shared by
/// several managers through the registry. After `close` every call fails
/// with `WriterError::Closed`.
pub trait RedoLogWriter: Send + Sync + fmt::Debug {
    /// Append records, in order
    fn write_log(&self, records: &[RedoRecord]) -> WriterResult<()>;

    /// Make everything written so far durable
    fn flush_log(&self) -> WriterResult<()>;

    /// Persist progress; lower values than already saved are ignored
    fn save_meta(&self, meta: &LogMeta) -> WriterResult<()>;

    /// Delete sealed segments whose max commit ts is below `up_to_ts`.
    /// Returns the number of segments removed.
    fn gc(&self, up_to_ts: Ts) -> WriterResult<usize>;

    /// Delete every segment and the meta file of the changefeed
    fn delete_all_logs(&self) -> WriterResult<()>;

    /// Seal open segments and release resources. Idempotent.
    fn close(&self) -> WriterResult<()>;

    /// Short backend name for logs
    fn kind(&self) -> &'static str;
}
