//! GC runner
//!
//! Periodically deletes sealed segments that lie entirely below the
//! published watermark. Failures are logged and retried on the next tick;
//! they never stop the manager.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::model::{ChangefeedId, Ts, MAX_TS};
use crate::observability::{log_event, Event, RedoMetrics, Severity};
use crate::writer::RedoLogWriter;

use super::errors::{RedoError, RedoResult};

#[derive(Debug)]
pub(crate) struct GcRunner {
    changefeed: ChangefeedId,
    writer: Arc<dyn RedoLogWriter>,
    watermark: watch::Receiver<Ts>,
    metrics: Arc<RedoMetrics>,
    last_collected: Option<Ts>,
}

impl GcRunner {
    pub(crate) fn new(
        changefeed: ChangefeedId,
        writer: Arc<dyn RedoLogWriter>,
        watermark: watch::Receiver<Ts>,
        metrics: Arc<RedoMetrics>,
    ) -> Self {
        Self {
            changefeed,
            writer,
            watermark,
            metrics,
            last_collected: None,
        }
    }

    /// Collect up to the latest watermark. `Ok(None)` when there was
    /// nothing new to collect.
    pub(crate) async fn run_once(&mut self) -> RedoResult<Option<usize>> {
        let target = *self.watermark.borrow_and_update();
        if target == MAX_TS || self.last_collected == Some(target) {
            return Ok(None);
        }

        let writer = self.writer.clone();
        let result = tokio::task::spawn_blocking(move || writer.gc(target))
            .await
            .map_err(|e| RedoError::Runtime(format!("gc task failed: {}", e)))?;

        let changefeed = self.changefeed.to_string();
        let target_str = target.to_string();
        match result {
            Ok(removed) => {
                self.last_collected = Some(target);
                self.metrics.increment_gc_runs();
                self.metrics.add_segments_removed(removed as u64);
                let removed_str = removed.to_string();
                let severity = if removed == 0 {
                    Severity::Trace
                } else {
                    Severity::Info
                };
                log_event(
                    severity,
                    Event::GcComplete,
                    &[
                        ("changefeed", changefeed.as_str()),
                        ("up_to_ts", target_str.as_str()),
                        ("removed", removed_str.as_str()),
                    ],
                );
                Ok(Some(removed))
            }
            Err(err) => {
                self.metrics.increment_gc_failures();
                let message = err.to_string();
                log_event(
                    Severity::Warn,
                    Event::GcFailed,
                    &[
                        ("changefeed", changefeed.as_str()),
                        ("up_to_ts", target_str.as_str()),
                        ("error", message.as_str()),
                    ],
                );
                Err(RedoError::Storage(err))
            }
        }
    }
}

/// Run `run_once` every `interval` until shutdown
pub(crate) async fn run_gc_loop(
    mut runner: GcRunner,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    // Errors are logged inside and retried next tick
                    _ = runner.run_once() => {}
                }
            }
        }
    }

    let changefeed = runner.changefeed.to_string();
    log_event(
        Severity::Info,
        Event::GcLoopExit,
        &[("changefeed", changefeed.as_str())],
    );
}
