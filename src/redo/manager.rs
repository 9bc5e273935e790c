//! # Redo Manager
//!
//! Entry point used by the replication pipeline. Callers register spans,
//! hand over row and DDL events and report resolved timestamps; none of
//! these calls touch storage. A flush loop persists buffered events through
//! the writer and publishes the global watermark, a GC loop reclaims
//! segments below it.
//!
//! A writer error fails the manager: the error is sent once on the error
//! channel, mutating calls return [`RedoError::Closed`] and
//! [`RedoManager::min_resolved_ts`] keeps serving the last good value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, ConsistentConfig, StorageScheme};
use crate::model::{ChangefeedId, DdlEvent, RowChangedEvent, Span, Ts, MAX_TS};
use crate::observability::{log_event, Event, MetricsSnapshot, RedoMetrics, Severity};
use crate::writer::{
    open_writer, BlackHoleWriter, RedoLogWriter, SharedWriter, WriterKey, WriterRegistry,
};

use super::buffer::{event_buffer, CacheBatch, EventSender};
use super::errors::{RedoError, RedoResult};
use super::flush::{run_flush_loop, FlushWorker};
use super::gc::{run_gc_loop, GcRunner};
use super::options::{ManagerOptions, ManagerState, StateCell};
use super::tracker::ResolvedTsTracker;

#[derive(Debug)]
pub struct RedoManager {
    changefeed: ChangefeedId,
    state: Arc<StateCell>,
    tracker: Arc<ResolvedTsTracker>,
    /// `None` when redo is disabled
    sender: Option<EventSender>,
    worker: Option<Arc<FlushWorker>>,
    writer: Option<Arc<SharedWriter>>,
    checkpoint_ts: Arc<AtomicU64>,
    metrics: Arc<RedoMetrics>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RedoManager {
    /// Build a manager bound to `changefeed`.
    ///
    /// With background loops enabled this must run inside a Tokio runtime.
    pub fn new(
        config: &ConsistentConfig,
        changefeed: ChangefeedId,
        options: ManagerOptions,
    ) -> RedoResult<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(RedoMetrics::new());
        let tracker = Arc::new(ResolvedTsTracker::new());
        let checkpoint_ts = Arc::new(AtomicU64::new(0));
        let changefeed_str = changefeed.to_string();

        if !config.is_enabled() {
            log_event(
                Severity::Info,
                Event::ManagerDisabled,
                &[("changefeed", changefeed_str.as_str()), ("level", config.level.as_str())],
            );
            return Ok(Self {
                changefeed,
                state: Arc::new(StateCell::new(ManagerState::Disabled)),
                tracker,
                sender: None,
                worker: None,
                writer: Some(Arc::new(SharedWriter::unshared(Arc::new(
                    BlackHoleWriter::new(),
                )))),
                checkpoint_ts,
                metrics,
                shutdown_tx,
                tasks: Vec::new(),
            });
        }

        let runtime = if options.enable_flush_loop || options.enable_gc_loop {
            Some(Handle::try_current().map_err(|_| {
                RedoError::Runtime("redo manager loops need a Tokio runtime".to_string())
            })?)
        } else {
            None
        };

        let uri = config.storage_uri()?;
        let shared = Arc::new(match &options.writer {
            Some(writer) => SharedWriter::unshared(writer.clone()),
            None => {
                if uri.scheme() == StorageScheme::S3 && options.object_store.is_none() {
                    return Err(ConfigError::MissingObjectStore(uri.to_string()).into());
                }
                let registry = options.registry.clone().unwrap_or_else(WriterRegistry::global);
                let key = WriterKey::new(uri.to_string(), changefeed.clone());
                let object_store = options.object_store.clone();
                let max_log_size = config.max_log_size_bytes();
                registry
                    .acquire(key, || open_writer(&uri, &changefeed, max_log_size, object_store))
                    .map_err(RedoError::Storage)?
            }
        });
        let writer = shared.writer().clone();

        let state = Arc::new(StateCell::new(ManagerState::Running));
        let (sender, receiver) = event_buffer();
        let (gc_tx, gc_rx) = watch::channel(MAX_TS);

        let worker = Arc::new(FlushWorker::new(
            changefeed.clone(),
            tracker.clone(),
            shared.clone(),
            receiver,
            state.clone(),
            metrics.clone(),
            checkpoint_ts.clone(),
            gc_tx,
            options.error_tx.clone(),
        ));

        let mut tasks = Vec::new();
        if let Some(runtime) = &runtime {
            if options.enable_flush_loop {
                tasks.push(runtime.spawn(run_flush_loop(
                    worker.clone(),
                    config.flush_interval(),
                    shutdown_rx.clone(),
                )));
            }
            if options.enable_gc_loop {
                let runner = GcRunner::new(changefeed.clone(), writer.clone(), gc_rx, metrics.clone());
                let interval = options.gc_interval.unwrap_or_else(|| config.gc_interval());
                tasks.push(runtime.spawn(run_gc_loop(runner, interval, shutdown_rx.clone())));
            }
        }

        let flush_ms = config.flush_interval_ms.to_string();
        log_event(
            Severity::Info,
            Event::ManagerStart,
            &[
                ("changefeed", changefeed_str.as_str()),
                ("storage", config.storage.as_str()),
                ("writer", writer.kind()),
                ("flush_interval_ms", flush_ms.as_str()),
            ],
        );

        Ok(Self {
            changefeed,
            state,
            tracker,
            sender: Some(sender),
            worker: Some(worker),
            writer: Some(shared),
            checkpoint_ts,
            metrics,
            shutdown_tx,
            tasks,
        })
    }

    /// Sender for a live manager, `None` when disabled
    fn live_sender(&self) -> RedoResult<Option<&EventSender>> {
        match self.state.get() {
            ManagerState::Disabled => Ok(None),
            ManagerState::Failed | ManagerState::Closed => Err(RedoError::Closed),
            ManagerState::Running => self.sender.as_ref().map(Some).ok_or(RedoError::Closed),
        }
    }

    fn log_table(&self, event: Event, span: &Span, ts: Option<Ts>) {
        let changefeed = self.changefeed.to_string();
        let span = span.to_string();
        let ts = ts.map(|t| t.to_string()).unwrap_or_default();
        let mut fields = vec![("changefeed", changefeed.as_str()), ("span", span.as_str())];
        if !ts.is_empty() {
            fields.push(("start_ts", ts.as_str()));
        }
        log_event(Severity::Info, event, &fields);
    }

    /// Start tracking `span` from `start_ts`. Re-adding a tracked span
    /// resets it, and events still buffered for the old entry are dropped.
    pub fn add_table(&self, span: Span, start_ts: Ts) -> RedoResult<()> {
        if self.live_sender()?.is_none() {
            return Ok(());
        }
        self.log_table(Event::TableAdded, &span, Some(start_ts));
        self.tracker.add(span, start_ts);
        Ok(())
    }

    /// Stop tracking `span`; its buffered events are dropped
    pub fn remove_table(&self, span: &Span) -> RedoResult<()> {
        if self.live_sender()?.is_none() {
            return Ok(());
        }
        if self.tracker.remove(span) {
            self.log_table(Event::TableRemoved, span, None);
        }
        Ok(())
    }

    /// Buffer row changes of a tracked span. Rows of an untracked span are
    /// ignored.
    pub fn emit_row_changed_events(&self, span: &Span, rows: Vec<RowChangedEvent>) -> RedoResult<()> {
        let Some(sender) = self.live_sender()? else {
            return Ok(());
        };
        if rows.is_empty() {
            return Ok(());
        }
        let Some(generation) = self.tracker.generation(span) else {
            return Ok(());
        };
        sender.send(CacheBatch::Rows {
            span: span.clone(),
            generation,
            rows,
        })
    }

    pub fn emit_ddl_event(&self, event: DdlEvent) -> RedoResult<()> {
        let Some(sender) = self.live_sender()? else {
            return Ok(());
        };
        sender.send(CacheBatch::Ddl { event })
    }

    /// Report that `span` has nothing left to emit at or below `ts`. Takes
    /// effect at the next flush, after the rows emitted before it.
    pub fn update_resolved_ts(&self, span: &Span, ts: Ts) -> RedoResult<()> {
        let Some(sender) = self.live_sender()? else {
            return Ok(());
        };
        let Some(generation) = self.tracker.generation(span) else {
            return Ok(());
        };
        sender.send(CacheBatch::Resolved {
            span: span.clone(),
            generation,
            ts,
        })
    }

    /// Record the pipeline's global checkpoint; saved in the log meta as
    /// the start of the replay range
    pub fn update_checkpoint_ts(&self, ts: Ts) -> RedoResult<()> {
        if self.live_sender()?.is_none() {
            return Ok(());
        }
        self.checkpoint_ts.fetch_max(ts, Ordering::AcqRel);
        Ok(())
    }

    /// Global watermark: the minimum flushed resolved ts over all tracked
    /// spans. `MAX_TS` when nothing constrains it.
    pub fn min_resolved_ts(&self) -> Ts {
        match self.state.get() {
            ManagerState::Disabled => MAX_TS,
            _ => self.tracker.min_resolved_ts(),
        }
    }

    /// Run one flush cycle now; returns the published watermark
    pub async fn flush_cycle(&self) -> RedoResult<Ts> {
        match &self.worker {
            Some(worker) => worker.flush_cycle().await,
            None if self.state.get() == ManagerState::Disabled => Ok(MAX_TS),
            None => Err(RedoError::Closed),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.get() != ManagerState::Disabled
    }

    pub fn state(&self) -> ManagerState {
        self.state.get()
    }

    pub fn changefeed(&self) -> &ChangefeedId {
        &self.changefeed
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Writer this manager writes through
    pub fn writer(&self) -> Option<&Arc<dyn RedoLogWriter>> {
        self.writer.as_deref().map(SharedWriter::writer)
    }

    /// Stop both loops, drop buffered events and release the writer
    pub async fn cleanup(self) -> RedoResult<()> {
        self.shutdown(false).await
    }

    /// `cleanup`, then delete every log of the changefeed if no other
    /// manager still uses the writer
    pub async fn cleanup_and_delete_logs(self) -> RedoResult<()> {
        self.shutdown(true).await
    }

    async fn shutdown(mut self, delete_logs: bool) -> RedoResult<()> {
        let changefeed = self.changefeed.to_string();
        log_event(
            Severity::Info,
            Event::ManagerCleanup,
            &[("changefeed", changefeed.as_str())],
        );

        self.state.close();
        self.shutdown_tx.send_replace(true);
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                return Err(RedoError::Runtime(format!("redo loop failed: {}", e)));
            }
        }

        self.sender = None;
        let mut discarded = 0;
        if let Some(worker) = self.worker.take() {
            discarded = worker.discard_pending().await;
        }

        if let Some(shared) = self.writer.take() {
            tokio::task::spawn_blocking(move || {
                if !delete_logs {
                    return shared.release();
                }
                if shared.release_and_delete()? {
                    log_event(
                        Severity::Info,
                        Event::LogsDeleted,
                        &[("changefeed", changefeed.as_str())],
                    );
                }
                Ok(())
            })
            .await
            .map_err(|e| RedoError::Runtime(format!("writer release failed: {}", e)))?
            .map_err(RedoError::Storage)?;
        }

        let changefeed = self.changefeed.to_string();
        let discarded = discarded.to_string();
        log_event(
            Severity::Info,
            Event::ManagerClosed,
            &[
                ("changefeed", changefeed.as_str()),
                ("discarded_batches", discarded.as_str()),
            ],
        );
        Ok(())
    }
}

impl Drop for RedoManager {
    fn drop(&mut self) {
        // Forgotten cleanup: stop the loops; the writer handle releases itself
        self.state.close();
        self.shutdown_tx.send_replace(true);
    }
}
