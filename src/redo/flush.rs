//! Flush scheduler
//!
//! One cycle moves everything buffered so far into the writer and, once
//! the writer reports it durable, publishes the new global watermark:
//!
//! ```text
//! drain -> write_log -> snapshot -> flush_log -> publish -> save_meta -> notify GC
//! ```
//!
//! The snapshot is taken after `write_log`, so every resolved ts it holds
//! is covered by rows already handed to the writer. A writer error fails
//! the manager: the error goes to the error channel once and the loop
//! exits.
//!
//! Meta and GC use the progress of every owner of the writer, not only this
//! manager's watermark; see [`SharedWriter::publish`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;

use crate::model::{ChangefeedId, Ts, MAX_TS};
use crate::observability::{log_event, Event, RedoMetrics, Severity};
use crate::writer::{LogMeta, RedoLogWriter, RedoRecord, SharedWriter, WriterResult};

use super::buffer::{CacheBatch, EventReceiver};
use super::errors::{FlushPhase, RedoError, RedoResult};
use super::options::StateCell;
use super::tracker::ResolvedTsTracker;

/// Records pulled out of the buffer for one cycle
#[derive(Debug, Default)]
struct Drained {
    records: Vec<RedoRecord>,
    rows: u64,
    ddls: u64,
    dropped: u64,
}

#[derive(Debug)]
pub(crate) struct FlushWorker {
    changefeed: ChangefeedId,
    tracker: Arc<ResolvedTsTracker>,
    shared: Arc<SharedWriter>,
    writer: Arc<dyn RedoLogWriter>,
    /// Held for a whole cycle, so cycles never overlap
    receiver: Mutex<EventReceiver>,
    state: Arc<StateCell>,
    metrics: Arc<RedoMetrics>,
    checkpoint_ts: Arc<AtomicU64>,
    gc_tx: watch::Sender<Ts>,
    error_tx: Option<mpsc::Sender<RedoError>>,
}

impl FlushWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        changefeed: ChangefeedId,
        tracker: Arc<ResolvedTsTracker>,
        shared: Arc<SharedWriter>,
        receiver: EventReceiver,
        state: Arc<StateCell>,
        metrics: Arc<RedoMetrics>,
        checkpoint_ts: Arc<AtomicU64>,
        gc_tx: watch::Sender<Ts>,
        error_tx: Option<mpsc::Sender<RedoError>>,
    ) -> Self {
        Self {
            changefeed,
            tracker,
            writer: shared.writer().clone(),
            shared,
            receiver: Mutex::new(receiver),
            state,
            metrics,
            checkpoint_ts,
            gc_tx,
            error_tx,
        }
    }

    /// Run one cycle. Returns the published watermark.
    ///
    /// On a writer error the manager is failed and the error reported
    /// before it is returned; later calls return `RedoError::Closed`.
    pub(crate) async fn flush_cycle(&self) -> RedoResult<Ts> {
        if self.state.get().is_terminal() {
            return Err(RedoError::Closed);
        }
        let mut receiver = self.receiver.lock().await;
        match self.run_cycle(&mut receiver).await {
            Ok(ts) => Ok(ts),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Refuse new batches and discard what is queued
    pub(crate) async fn discard_pending(&self) -> usize {
        let mut receiver = self.receiver.lock().await;
        receiver.close();
        receiver.drain().len()
    }

    async fn run_cycle(&self, receiver: &mut EventReceiver) -> RedoResult<Ts> {
        let started = Instant::now();
        let drained = self.drain(receiver);

        if !drained.records.is_empty() {
            let records = drained.records;
            self.run_writer(FlushPhase::WriteLog, move |w| w.write_log(&records))
                .await?;
        }

        let snapshot = self.tracker.snapshot_for_flush();
        self.run_writer(FlushPhase::FlushLog, |w| w.flush_log())
            .await?;

        let published = self.tracker.publish_flushed(&snapshot);
        let checkpoint = self.checkpoint_ts.load(Ordering::Acquire).min(published);
        let floor = self
            .shared
            .publish(LogMeta::new(checkpoint, published))
            .map_err(|e| RedoError::writer(FlushPhase::SaveMeta, e))?;
        let gc_floor = match floor {
            Some(meta) if meta.resolved_ts != MAX_TS => {
                self.run_writer(FlushPhase::SaveMeta, move |w| w.save_meta(&meta))
                    .await?;
                meta.resolved_ts
            }
            _ => MAX_TS,
        };
        self.gc_tx.send_replace(gc_floor);

        self.metrics.add_rows(drained.rows);
        self.metrics.add_ddls(drained.ddls);
        self.metrics.add_batches_dropped(drained.dropped);
        self.metrics.increment_flush_cycles();

        let changefeed = self.changefeed.to_string();
        let published_str = published.to_string();
        let rows = drained.rows.to_string();
        let elapsed = started.elapsed().as_millis().to_string();
        log_event(
            Severity::Trace,
            Event::FlushCycle,
            &[
                ("changefeed", changefeed.as_str()),
                ("resolved_ts", published_str.as_str()),
                ("rows", rows.as_str()),
                ("elapsed_ms", elapsed.as_str()),
            ],
        );
        Ok(published)
    }

    /// Pull every queued batch. Rows and resolved ts of spans removed (or
    /// re-added) since they were queued are dropped; a resolved ts is
    /// applied to the tracker in queue order, after the rows before it.
    fn drain(&self, receiver: &mut EventReceiver) -> Drained {
        let mut drained = Drained::default();
        for batch in receiver.drain() {
            match batch {
                CacheBatch::Rows {
                    span,
                    generation,
                    rows,
                } => {
                    if self.tracker.generation(&span) != Some(generation) {
                        drained.dropped += 1;
                        continue;
                    }
                    drained.rows += rows.len() as u64;
                    drained
                        .records
                        .extend(rows.into_iter().map(RedoRecord::Row));
                }
                CacheBatch::Resolved {
                    span,
                    generation,
                    ts,
                } => {
                    if self.tracker.generation(&span) != Some(generation) {
                        drained.dropped += 1;
                        continue;
                    }
                    self.tracker.update_ts_if_current(&span, generation, ts);
                }
                CacheBatch::Ddl { event } => {
                    drained.ddls += 1;
                    drained.records.push(RedoRecord::Ddl(event));
                }
            }
        }
        drained
    }

    /// Run a writer call on the blocking pool
    async fn run_writer<F>(&self, phase: FlushPhase, op: F) -> RedoResult<()>
    where
        F: FnOnce(&dyn RedoLogWriter) -> WriterResult<()> + Send + 'static,
    {
        let writer = self.writer.clone();
        match tokio::task::spawn_blocking(move || op(writer.as_ref())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(RedoError::writer(phase, source)),
            Err(join) => Err(RedoError::Runtime(format!("{} task failed: {}", phase, join))),
        }
    }

    fn fail(&self, err: &RedoError) {
        if !self.state.fail() {
            return;
        }
        self.metrics.increment_flush_failures();

        let changefeed = self.changefeed.to_string();
        let message = err.to_string();
        log_event(
            Severity::Error,
            Event::FlushFailed,
            &[
                ("changefeed", changefeed.as_str()),
                ("code", err.code()),
                ("error", message.as_str()),
            ],
        );

        let Some(error_tx) = &self.error_tx else {
            return;
        };
        if error_tx.try_send(err.clone()).is_err() {
            log_event(
                Severity::Warn,
                Event::ErrorDropped,
                &[
                    ("changefeed", changefeed.as_str()),
                    ("error", message.as_str()),
                ],
            );
        }
    }
}

/// Call `flush_cycle` every `interval` until shutdown or failure
pub(crate) async fn run_flush_loop(
    worker: Arc<FlushWorker>,
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
                let result = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    result = worker.flush_cycle() => result,
                };
                if result.is_err() {
                    break;
                }
            }
        }
    }

    let changefeed = worker.changefeed.to_string();
    let state = worker.state.get();
    log_event(
        Severity::Info,
        Event::FlushLoopExit,
        &[
            ("changefeed", changefeed.as_str()),
            ("state", state.as_str()),
        ],
    );
}
