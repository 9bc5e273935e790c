//! # Black Hole Writer
//!
//! Discards everything. Used when redo is disabled, for `blackhole://`
//! storage, and with a [`FaultPlan`] to inject writer failures in tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::model::Ts;

use super::backend::{LogMeta, RedoLogWriter};
use super::errors::{WriterError, WriterResult};
use super::record::RedoRecord;

/// Which writer calls fail.
///
/// Calls are counted from 1; once a trigger trips, that call and every
/// later one of the same kind fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub fail_write_on: Option<u64>,
    pub fail_flush_on: Option<u64>,
}

impl FaultPlan {
    pub fn none() -> Self {
        Self::default()
    }

    /// Every write and flush fails
    pub fn always() -> Self {
        Self {
            fail_write_on: Some(1),
            fail_flush_on: Some(1),
        }
    }

    pub fn fail_write_on(mut self, call: u64) -> Self {
        self.fail_write_on = Some(call);
        self
    }

    pub fn fail_flush_on(mut self, call: u64) -> Self {
        self.fail_flush_on = Some(call);
        self
    }

    fn trips(trigger: Option<u64>, call: u64) -> bool {
        trigger.map_or(false, |n| call >= n)
    }
}

#[derive(Debug, Default)]
pub struct BlackHoleWriter {
    plan: FaultPlan,
    write_calls: AtomicU64,
    flush_calls: AtomicU64,
    records: AtomicU64,
    max_commit_ts: AtomicU64,
    meta: Mutex<LogMeta>,
    closed: AtomicBool,
}

impl BlackHoleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer whose every write and flush fails
    pub fn invalid() -> Self {
        Self::with_faults(FaultPlan::always())
    }

    pub fn with_faults(plan: FaultPlan) -> Self {
        Self {
            plan,
            ..Self::default()
        }
    }

    /// Records accepted so far
    pub fn records_written(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// Highest commit ts among accepted records
    pub fn max_commit_ts(&self) -> Ts {
        self.max_commit_ts.load(Ordering::Relaxed)
    }

    /// Calls to `flush_log`, failed ones included
    pub fn flush_calls(&self) -> u64 {
        self.flush_calls.load(Ordering::Relaxed)
    }

    pub fn last_meta(&self) -> LogMeta {
        *self.meta.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> WriterResult<()> {
        if self.is_closed() {
            return Err(WriterError::Closed);
        }
        Ok(())
    }
}

impl RedoLogWriter for BlackHoleWriter {
    fn write_log(&self, records: &[RedoRecord]) -> WriterResult<()> {
        self.ensure_open()?;
        let call = self.write_calls.fetch_add(1, Ordering::Relaxed) + 1;
        if FaultPlan::trips(self.plan.fail_write_on, call) {
            return Err(WriterError::InvalidBlackHole);
        }
        self.records
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        if let Some(max) = records.iter().map(RedoRecord::commit_ts).max() {
            self.max_commit_ts.fetch_max(max, Ordering::Relaxed);
        }
        Ok(())
    }

    fn flush_log(&self) -> WriterResult<()> {
        self.ensure_open()?;
        let call = self.flush_calls.fetch_add(1, Ordering::Relaxed) + 1;
        if FaultPlan::trips(self.plan.fail_flush_on, call) {
            return Err(WriterError::InvalidBlackHole);
        }
        Ok(())
    }

    fn save_meta(&self, meta: &LogMeta) -> WriterResult<()> {
        self.ensure_open()?;
        let mut saved = self
            .meta
            .lock()
            .map_err(|_| WriterError::LockPoisoned("black hole meta"))?;
        *saved = saved.merge(meta);
        Ok(())
    }

    fn gc(&self, _up_to_ts: Ts) -> WriterResult<usize> {
        self.ensure_open()?;
        Ok(0)
    }

    fn delete_all_logs(&self) -> WriterResult<()> {
        self.ensure_open()
    }

    fn close(&self) -> WriterResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "blackhole"
    }
}
