//! Redo manager behavior
//!
//! Watermark publication, table lifecycle, failure handling and writer
//! sharing, driven either by the background loops or by `flush_cycle`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cdc_redo::config::ConsistentConfig;
use cdc_redo::model::{ChangefeedId, DdlEvent, RowChangedEvent, Span, TableName, Ts, MAX_TS};
use cdc_redo::redo::{FlushPhase, ManagerOptions, ManagerState, RedoError, RedoManager};
use cdc_redo::writer::{
    BlackHoleWriter, FaultPlan, FileWriter, LogMeta, MemoryObjectStore, ReadRange,
    RedoLogReader, RedoLogWriter, WriterKey, WriterRegistry,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

// =============================================================================
// Test Utilities
// =============================================================================

fn changefeed(id: &str) -> ChangefeedId {
    ChangefeedId::with_default_namespace(id)
}

fn local_config(dir: &Path) -> ConsistentConfig {
    ConsistentConfig::eventual(format!("local://{}", dir.display())).with_flush_interval_ms(50)
}

fn rows(span: &Span, commit_ts: &[Ts]) -> Vec<RowChangedEvent> {
    commit_ts
        .iter()
        .map(|ts| RowChangedEvent::new(*ts, TableName::from_id(span.table_id)))
        .collect()
}

/// Manager with no loops over an inspectable discard writer
fn manual_manager(writer: Arc<BlackHoleWriter>) -> RedoManager {
    RedoManager::new(
        &ConsistentConfig::eventual("blackhole://"),
        changefeed("manual"),
        ManagerOptions::manual().with_writer(writer),
    )
    .unwrap()
}

/// Poll until the published watermark reaches `target`
async fn wait_for_min_ts(manager: &RedoManager, target: Ts) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let current = manager.min_resolved_ts();
        if current == target {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "min resolved ts stuck at {}, want {}",
            current,
            target
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// Watermark
// =============================================================================

/// Processor-side flow: the watermark follows the slowest span and moves up
/// once that span is removed.
#[tokio::test]
async fn test_processor_flow_publishes_watermark() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(WriterRegistry::new());
    let cf = changefeed("processor");
    let manager = RedoManager::new(
        &local_config(temp.path()),
        cf.clone(),
        ManagerOptions::default().with_registry(registry),
    )
    .unwrap();
    assert!(manager.is_enabled());

    let spans: Vec<Span> = [53, 55, 57, 59].into_iter().map(Span::for_table).collect();
    for span in &spans {
        manager.add_table(span.clone(), 100).unwrap();
    }
    for span in &spans {
        manager
            .emit_row_changed_events(span, rows(span, &[120, 130]))
            .unwrap();
    }
    for span in &spans {
        manager.update_resolved_ts(span, 150).unwrap();
    }
    wait_for_min_ts(&manager, 150).await;

    manager.remove_table(&spans[3]).unwrap();
    for span in &spans[..3] {
        manager.update_resolved_ts(span, 200).unwrap();
    }
    wait_for_min_ts(&manager, 200).await;

    manager.cleanup().await.unwrap();

    let reader = RedoLogReader::from_dir(temp.path(), cf);
    let meta = reader.read_meta().unwrap().unwrap();
    assert_eq!(meta.resolved_ts, 200);
    let replay = reader.read_rows(reader.default_range().unwrap()).unwrap();
    assert_eq!(replay.len(), 8);
    assert!(replay.windows(2).all(|w| w[0].commit_ts <= w[1].commit_ts));
}

#[tokio::test]
async fn test_removing_slowest_span_raises_watermark() {
    let manager = manual_manager(Arc::new(BlackHoleWriter::new()));
    let a = Span::for_table(1);
    let b = Span::for_table(2);

    manager.add_table(a.clone(), 10).unwrap();
    manager.add_table(b.clone(), 20).unwrap();
    assert_eq!(manager.flush_cycle().await.unwrap(), 10);
    assert_eq!(manager.min_resolved_ts(), 10);

    manager.remove_table(&a).unwrap();
    assert_eq!(manager.min_resolved_ts(), 20);

    manager.add_table(a, 10).unwrap();
    assert_eq!(manager.min_resolved_ts(), 10);

    manager.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_lagging_span_holds_watermark() {
    let manager = manual_manager(Arc::new(BlackHoleWriter::new()));
    let a = Span::for_table(1);
    let b = Span::for_table(2);
    manager.add_table(a.clone(), 20).unwrap();
    manager.add_table(b.clone(), 20).unwrap();
    manager.flush_cycle().await.unwrap();

    manager.update_resolved_ts(&b, 30).unwrap();
    assert_eq!(manager.flush_cycle().await.unwrap(), 20);
    assert_eq!(manager.min_resolved_ts(), 20);

    // An untouched span keeps its start ts across cycles
    manager.flush_cycle().await.unwrap();
    assert_eq!(manager.min_resolved_ts(), 20);

    manager.update_resolved_ts(&a, 25).unwrap();
    assert_eq!(manager.flush_cycle().await.unwrap(), 25);

    manager.cleanup().await.unwrap();
}

/// Table map sequence: adds, removals and resolved ts in between cycles
#[tokio::test]
async fn test_table_map_sequence() {
    let manager = manual_manager(Arc::new(BlackHoleWriter::new()));
    let spans: Vec<Span> = (1..=4).map(Span::for_table).collect();

    assert_eq!(manager.flush_cycle().await.unwrap(), MAX_TS);
    assert_eq!(manager.min_resolved_ts(), MAX_TS);

    for (span, ts) in spans.iter().zip([100, 90, 110, 120]) {
        manager.add_table(span.clone(), ts).unwrap();
    }
    assert_eq!(manager.min_resolved_ts(), 90);

    manager.update_resolved_ts(&spans[1], 130).unwrap();
    assert_eq!(manager.flush_cycle().await.unwrap(), 100);

    manager.remove_table(&spans[0]).unwrap();
    assert_eq!(manager.min_resolved_ts(), 110);

    // Decreasing and unknown updates are ignored
    manager.update_resolved_ts(&spans[2], 50).unwrap();
    manager.update_resolved_ts(&Span::for_table(99), 1).unwrap();
    assert_eq!(manager.flush_cycle().await.unwrap(), 110);

    for span in &spans[1..] {
        manager.remove_table(span).unwrap();
    }
    assert_eq!(manager.min_resolved_ts(), MAX_TS);

    manager.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_stale_batches_are_dropped() {
    let writer = Arc::new(BlackHoleWriter::new());
    let manager = manual_manager(writer.clone());
    let span = Span::for_table(7);

    manager.add_table(span.clone(), 100).unwrap();
    manager
        .emit_row_changed_events(&span, rows(&span, &[110, 120]))
        .unwrap();
    manager.update_resolved_ts(&span, 500).unwrap();

    // Re-adding resets the span; what was queued for the old entry goes away
    manager.add_table(span.clone(), 100).unwrap();
    manager.emit_row_changed_events(&span, rows(&span, &[130])).unwrap();

    assert_eq!(manager.flush_cycle().await.unwrap(), 100);
    assert_eq!(writer.records_written(), 1);
    assert_eq!(manager.metrics().batches_dropped, 2);
    assert_eq!(manager.metrics().rows_written, 1);

    manager.cleanup().await.unwrap();
}

/// Re-emitted rows are written again but never move the watermark
#[tokio::test]
async fn test_duplicate_rows_do_not_advance_watermark() {
    let writer = Arc::new(BlackHoleWriter::new());
    let manager = manual_manager(writer.clone());
    let span = Span::for_table(4);

    manager.add_table(span.clone(), 100).unwrap();
    manager
        .emit_row_changed_events(&span, rows(&span, &[110, 120]))
        .unwrap();
    manager
        .emit_row_changed_events(&span, rows(&span, &[110, 120]))
        .unwrap();

    assert_eq!(manager.flush_cycle().await.unwrap(), 100);
    assert_eq!(writer.records_written(), 4);
    assert_eq!(manager.metrics().rows_written, 4);
    assert_eq!(manager.min_resolved_ts(), 100);

    manager.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_rows_of_unknown_span_are_ignored() {
    let writer = Arc::new(BlackHoleWriter::new());
    let manager = manual_manager(writer.clone());
    let span = Span::for_table(3);

    manager.emit_row_changed_events(&span, rows(&span, &[10])).unwrap();
    manager.flush_cycle().await.unwrap();
    assert_eq!(writer.records_written(), 0);

    manager.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_checkpoint_is_saved_in_meta() {
    let writer = Arc::new(BlackHoleWriter::new());
    let manager = manual_manager(writer.clone());
    let span = Span::for_table(1);

    manager.add_table(span.clone(), 100).unwrap();
    manager.update_resolved_ts(&span, 150).unwrap();
    manager.update_checkpoint_ts(120).unwrap();
    manager.flush_cycle().await.unwrap();

    let meta = writer.last_meta();
    assert_eq!(meta.checkpoint_ts, 120);
    assert_eq!(meta.resolved_ts, 150);

    // The checkpoint never runs ahead of the published watermark
    manager.update_checkpoint_ts(400).unwrap();
    manager.flush_cycle().await.unwrap();
    assert_eq!(writer.last_meta().checkpoint_ts, 150);

    manager.cleanup().await.unwrap();
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_write_error_is_reported_once() {
    let (error_tx, mut error_rx) = mpsc::channel(1);
    let manager = RedoManager::new(
        &ConsistentConfig::eventual("blackhole://").with_flush_interval_ms(50),
        changefeed("write-error"),
        ManagerOptions::default()
            .with_error_tx(error_tx)
            .with_writer(Arc::new(BlackHoleWriter::invalid())),
    )
    .unwrap();

    // Queued before the loop gets to run, so the first cycle has rows
    let span = Span::for_table(1);
    manager.add_table(span.clone(), 100).unwrap();
    manager.emit_row_changed_events(&span, rows(&span, &[110])).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(10), error_rx.recv())
        .await
        .expect("no error reported")
        .expect("error channel closed");
    assert_eq!(err.phase(), Some(FlushPhase::WriteLog));
    let message = err.to_string();
    assert!(message.contains("invalid black hole writer"), "{}", message);
    assert!(message.contains("WriteLog"), "{}", message);

    wait_until("failed state", || manager.state() == ManagerState::Failed).await;
    assert!(matches!(manager.add_table(span, 200), Err(RedoError::Closed)));
    assert!(error_rx.try_recv().is_err());

    manager.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_flush_error_from_loop() {
    let (error_tx, mut error_rx) = mpsc::channel(1);
    let manager = RedoManager::new(
        &ConsistentConfig::eventual("blackhole://").with_flush_interval_ms(50),
        changefeed("flush-error"),
        ManagerOptions::default()
            .with_error_tx(error_tx)
            .with_writer(Arc::new(BlackHoleWriter::invalid())),
    )
    .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(10), error_rx.recv())
        .await
        .expect("no error reported")
        .expect("error channel closed");
    assert_eq!(err.code(), "REDO_FLUSH_LOG_FAILED");
    assert!(err.to_string().contains("FlushLog"));

    manager.cleanup().await.unwrap();
}

/// A writer failing on its second flush stops the manager; the last good
/// watermark stays readable.
#[tokio::test]
async fn test_failed_manager_refuses_calls() {
    let (error_tx, mut error_rx) = mpsc::channel(1);
    let writer = Arc::new(BlackHoleWriter::with_faults(FaultPlan::none().fail_flush_on(2)));
    let manager = RedoManager::new(
        &ConsistentConfig::eventual("blackhole://"),
        changefeed("second-flush"),
        ManagerOptions::manual()
            .with_error_tx(error_tx)
            .with_writer(writer),
    )
    .unwrap();

    let span = Span::for_table(1);
    manager.add_table(span.clone(), 100).unwrap();
    manager.update_resolved_ts(&span, 150).unwrap();
    assert_eq!(manager.flush_cycle().await.unwrap(), 150);

    manager.update_resolved_ts(&span, 180).unwrap();
    let err = manager.flush_cycle().await.unwrap_err();
    assert_eq!(err.phase(), Some(FlushPhase::FlushLog));
    assert_eq!(manager.state(), ManagerState::Failed);

    let reported = error_rx.try_recv().unwrap();
    assert_eq!(reported.code(), "REDO_FLUSH_LOG_FAILED");
    assert!(error_rx.try_recv().is_err());

    assert!(matches!(manager.add_table(Span::for_table(2), 1), Err(RedoError::Closed)));
    assert!(matches!(manager.remove_table(&span), Err(RedoError::Closed)));
    assert!(matches!(
        manager.emit_row_changed_events(&span, rows(&span, &[190])),
        Err(RedoError::Closed)
    ));
    assert!(matches!(
        manager.emit_ddl_event(DdlEvent::new(190, 191, "drop table t")),
        Err(RedoError::Closed)
    ));
    assert!(matches!(manager.update_resolved_ts(&span, 200), Err(RedoError::Closed)));
    assert!(matches!(manager.flush_cycle().await, Err(RedoError::Closed)));
    assert_eq!(manager.min_resolved_ts(), 150);
    assert_eq!(manager.metrics().flush_failures, 1);

    manager.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_full_error_channel_does_not_block() {
    let (error_tx, mut error_rx) = mpsc::channel(1);
    error_tx
        .try_send(RedoError::Runtime("earlier".to_string()))
        .unwrap();
    let manager = RedoManager::new(
        &ConsistentConfig::eventual("blackhole://"),
        changefeed("full-channel"),
        ManagerOptions::manual()
            .with_error_tx(error_tx)
            .with_writer(Arc::new(BlackHoleWriter::invalid())),
    )
    .unwrap();

    assert!(manager.flush_cycle().await.is_err());
    assert_eq!(manager.state(), ManagerState::Failed);
    assert_eq!(error_rx.try_recv().unwrap().code(), "REDO_RUNTIME_ERROR");
    assert!(error_rx.try_recv().is_err());

    manager.cleanup().await.unwrap();
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_level_none_is_a_no_op() {
    let manager = RedoManager::new(
        &ConsistentConfig::default(),
        changefeed("disabled"),
        ManagerOptions::default(),
    )
    .unwrap();
    assert!(!manager.is_enabled());
    assert_eq!(manager.state(), ManagerState::Disabled);

    let span = Span::for_table(1);
    manager.add_table(span.clone(), 100).unwrap();
    manager.emit_row_changed_events(&span, rows(&span, &[110])).unwrap();
    manager.emit_ddl_event(DdlEvent::new(100, 101, "create table t")).unwrap();
    manager.update_resolved_ts(&span, 150).unwrap();
    manager.update_checkpoint_ts(120).unwrap();

    assert_eq!(manager.flush_cycle().await.unwrap(), MAX_TS);
    assert_eq!(manager.min_resolved_ts(), MAX_TS);
    assert_eq!(manager.writer().unwrap().kind(), "blackhole");

    manager.cleanup().await.unwrap();
}

#[test]
fn test_loops_need_a_runtime() {
    let err = RedoManager::new(
        &ConsistentConfig::eventual("blackhole://"),
        changefeed("no-runtime"),
        ManagerOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.code(), "REDO_RUNTIME_ERROR");
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = ConsistentConfig::eventual("blackhole://").with_flush_interval_ms(10);
    let err = RedoManager::new(&config, changefeed("bad"), ManagerOptions::manual()).unwrap_err();
    assert_eq!(err.code(), "REDO_CONFIG_INVALID");

    let s3 = ConsistentConfig::eventual("s3://bucket/redo");
    let err = RedoManager::new(&s3, changefeed("bad"), ManagerOptions::manual()).unwrap_err();
    assert_eq!(err.code(), "REDO_CONFIG_INVALID");
}

#[tokio::test]
async fn test_cleanup_closes_private_writer() {
    let writer = Arc::new(BlackHoleWriter::new());
    let manager = manual_manager(writer.clone());
    manager.add_table(Span::for_table(1), 100).unwrap();

    manager.cleanup().await.unwrap();
    assert!(writer.is_closed());
}

/// The owner removing a changefeed deletes its logs
#[tokio::test]
async fn test_cleanup_and_delete_logs() {
    let temp = TempDir::new().unwrap();
    let cf = changefeed("owner");
    let manager = RedoManager::new(
        &local_config(temp.path()),
        cf.clone(),
        ManagerOptions::manual().with_registry(Arc::new(WriterRegistry::new())),
    )
    .unwrap();

    let span = Span::for_table(1);
    manager.add_table(span.clone(), 100).unwrap();
    manager
        .emit_ddl_event(DdlEvent::new(100, 110, "create table t"))
        .unwrap();
    manager.emit_row_changed_events(&span, rows(&span, &[120])).unwrap();
    manager.update_resolved_ts(&span, 150).unwrap();
    manager.flush_cycle().await.unwrap();

    let reader = RedoLogReader::from_dir(temp.path(), cf.clone());
    assert_eq!(reader.segments().unwrap().len(), 2);
    assert!(reader.read_meta().unwrap().is_some());

    manager.cleanup_and_delete_logs().await.unwrap();
    assert!(reader.segments().unwrap().is_empty());
    assert!(reader.read_meta().unwrap().is_none());
}

/// Two managers on one storage target share a writer; closing one leaves
/// the other working.
#[tokio::test]
async fn test_shared_writer_survives_sibling_cleanup() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(WriterRegistry::new());
    let config = local_config(temp.path());
    let cf = changefeed("shared");
    let key = WriterKey::new(config.storage_uri().unwrap().to_string(), cf.clone());

    let options = || ManagerOptions::manual().with_registry(registry.clone());
    let first = RedoManager::new(&config, cf.clone(), options()).unwrap();
    let second = RedoManager::new(&config, cf.clone(), options()).unwrap();
    assert_eq!(registry.owners(&key), 2);
    assert!(Arc::ptr_eq(first.writer().unwrap(), second.writer().unwrap()));

    // Not the last owner, so the logs stay
    first.cleanup_and_delete_logs().await.unwrap();
    assert_eq!(registry.owners(&key), 1);

    let span = Span::for_table(9);
    second.add_table(span.clone(), 100).unwrap();
    second.emit_row_changed_events(&span, rows(&span, &[110])).unwrap();
    second.update_resolved_ts(&span, 120).unwrap();
    assert_eq!(second.flush_cycle().await.unwrap(), 120);

    second.cleanup().await.unwrap();
    assert_eq!(registry.owners(&key), 0);

    let reader = RedoLogReader::from_dir(temp.path(), cf);
    assert_eq!(reader.read_rows(ReadRange::all()).unwrap().len(), 1);
}

/// Managers sharing a writer share its segments and meta file: neither
/// reclaims nor records past what the slower one has published.
#[tokio::test]
async fn test_shared_writer_follows_slowest_owner() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(WriterRegistry::new());
    let config = local_config(temp.path());
    let cf = changefeed("siblings");
    let key = WriterKey::new(config.storage_uri().unwrap().to_string(), cf.clone());

    // One record per segment, so every write seals a segment
    let seed = registry
        .acquire(key.clone(), || {
            let writer: Arc<dyn RedoLogWriter> =
                Arc::new(FileWriter::local(temp.path(), cf.clone(), 1)?);
            Ok(writer)
        })
        .unwrap();
    let lagging = RedoManager::new(
        &config,
        cf.clone(),
        ManagerOptions::manual().with_registry(registry.clone()),
    )
    .unwrap();
    let leading = RedoManager::new(
        &config,
        cf.clone(),
        ManagerOptions::default()
            .with_registry(registry.clone())
            .with_gc_interval(Duration::from_millis(20)),
    )
    .unwrap();
    seed.release().unwrap();
    assert_eq!(registry.owners(&key), 2);

    let slow = Span::for_table(2);
    lagging.add_table(slow.clone(), 100).unwrap();
    lagging
        .emit_row_changed_events(&slow, rows(&slow, &[150]))
        .unwrap();
    assert_eq!(lagging.flush_cycle().await.unwrap(), 100);

    let fast = Span::for_table(1);
    leading.add_table(fast.clone(), 100).unwrap();
    leading
        .emit_row_changed_events(&fast, rows(&fast, &[110]))
        .unwrap();
    leading.update_resolved_ts(&fast, 500).unwrap();
    wait_for_min_ts(&leading, 500).await;
    wait_until("gc run", || leading.metrics().gc_runs >= 1).await;

    let reader = RedoLogReader::from_dir(temp.path(), cf.clone());
    assert_eq!(reader.read_meta().unwrap(), Some(LogMeta::new(0, 100)));
    let kept: Vec<Ts> = reader
        .read_rows(ReadRange::all())
        .unwrap()
        .iter()
        .map(|r| r.commit_ts)
        .collect();
    assert_eq!(kept, vec![110, 150]);
    assert_eq!(leading.metrics().segments_removed, 0);

    // Once the lagging manager catches up, both rows fall below the floor
    lagging.update_resolved_ts(&slow, 300).unwrap();
    assert_eq!(lagging.flush_cycle().await.unwrap(), 300);
    wait_until("gc of both rows", || leading.metrics().segments_removed >= 2).await;
    assert_eq!(reader.read_meta().unwrap(), Some(LogMeta::new(0, 300)));
    assert!(reader.read_rows(ReadRange::all()).unwrap().is_empty());

    lagging.cleanup().await.unwrap();
    leading.cleanup().await.unwrap();
    assert_eq!(registry.owners(&key), 0);
}

// =============================================================================
// Storage targets
// =============================================================================

#[tokio::test]
async fn test_object_storage_round_trip() {
    let store = Arc::new(MemoryObjectStore::new());
    let cf = changefeed("s3");
    let manager = RedoManager::new(
        &ConsistentConfig::eventual("s3://bucket/redo"),
        cf.clone(),
        ManagerOptions::manual()
            .with_registry(Arc::new(WriterRegistry::new()))
            .with_object_store(store.clone()),
    )
    .unwrap();
    assert_eq!(manager.writer().unwrap().kind(), "s3");

    let span = Span::for_table(4);
    manager.add_table(span.clone(), 100).unwrap();
    manager
        .emit_row_changed_events(&span, rows(&span, &[110, 120]))
        .unwrap();
    manager.update_resolved_ts(&span, 130).unwrap();
    manager.flush_cycle().await.unwrap();

    // One row object and the meta
    assert_eq!(store.len(), 2);

    manager.emit_row_changed_events(&span, rows(&span, &[140])).unwrap();
    manager.update_resolved_ts(&span, 150).unwrap();
    manager.flush_cycle().await.unwrap();
    assert_eq!(store.len(), 3);
    manager.cleanup().await.unwrap();

    let reader = RedoLogReader::from_object_store(store, "redo", cf);
    assert_eq!(reader.read_meta().unwrap().unwrap().resolved_ts, 150);
    let replay = reader.read_rows(reader.default_range().unwrap()).unwrap();
    let ts: Vec<Ts> = replay.iter().map(|r| r.commit_ts).collect();
    assert_eq!(ts, vec![110, 120, 140]);
}

#[tokio::test]
async fn test_gc_loop_reclaims_segments_below_watermark() {
    let temp = TempDir::new().unwrap();
    let cf = changefeed("gc");
    // One record per segment, so every write seals a segment
    let writer = Arc::new(FileWriter::local(temp.path(), cf.clone(), 1).unwrap());
    let manager = RedoManager::new(
        &local_config(temp.path()),
        cf.clone(),
        ManagerOptions::default()
            .with_writer(writer)
            .with_gc_interval(Duration::from_millis(20)),
    )
    .unwrap();

    let span = Span::for_table(1);
    manager.add_table(span.clone(), 100).unwrap();
    manager
        .emit_row_changed_events(&span, rows(&span, &[110, 120, 200]))
        .unwrap();
    manager.update_resolved_ts(&span, 150).unwrap();
    wait_for_min_ts(&manager, 150).await;
    wait_until("gc run", || manager.metrics().segments_removed >= 2).await;

    let reader = RedoLogReader::from_dir(temp.path(), cf);
    let left: Vec<Option<Ts>> = reader
        .segments()
        .unwrap()
        .into_iter()
        .map(|s| s.max_commit_ts)
        .collect();
    assert_eq!(left, vec![Some(200)]);

    manager.cleanup().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers() {
    let temp = TempDir::new().unwrap();
    let cf = changefeed("concurrent");
    let manager = Arc::new(
        RedoManager::new(
            &local_config(temp.path()),
            cf.clone(),
            ManagerOptions::default().with_registry(Arc::new(WriterRegistry::new())),
        )
        .unwrap(),
    );

    let mut producers = Vec::new();
    for table_id in 1..=4 {
        let manager = manager.clone();
        producers.push(tokio::spawn(async move {
            let span = Span::for_table(table_id);
            manager.add_table(span.clone(), 100).unwrap();
            for step in 1..=25u64 {
                let ts = 100 + step * 10;
                manager
                    .emit_row_changed_events(&span, rows(&span, &[ts - 5]))
                    .unwrap();
                manager.update_resolved_ts(&span, ts).unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    wait_for_min_ts(&manager, 350).await;
    let manager = Arc::try_unwrap(manager).unwrap();
    manager.cleanup().await.unwrap();

    let reader = RedoLogReader::from_dir(temp.path(), cf);
    let replay = reader.read_rows(reader.default_range().unwrap()).unwrap();
    assert_eq!(replay.len(), 100);
    for table_id in 1..=4 {
        let ts: Vec<Ts> = replay
            .iter()
            .filter(|r| r.table.table_id == table_id)
            .map(|r| r.commit_ts)
            .collect();
        assert_eq!(ts.len(), 25);
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }
}
