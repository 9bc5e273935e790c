//! Resolved-timestamp tracker
//!
//! Per tracked span two watermarks are kept:
//! - `unflushed`: the latest ts callers reported as resolved
//! - `flushed`: the part of it made durable by a completed flush cycle
//!
//! Readers only see the published minimum of `flushed` over all tracked
//! spans, loaded from an atomic without touching the map lock. With no
//! tracked span the minimum is `MAX_TS`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::{Span, Ts, MAX_TS};

#[derive(Debug, Clone, Copy)]
struct SpanState {
    unflushed: Ts,
    flushed: Ts,
    generation: u64,
}

/// Unflushed watermarks captured at the start of a flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSnapshot {
    pub spans: HashMap<Span, Ts>,
    /// Minimum over `spans`, `MAX_TS` when empty
    pub min_ts: Ts,
    /// Entry each captured ts belongs to
    generations: HashMap<Span, u64>,
}

#[derive(Debug)]
pub struct ResolvedTsTracker {
    spans: RwLock<HashMap<Span, SpanState>>,
    published: AtomicU64,
    next_generation: AtomicU64,
}

impl Default for ResolvedTsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolvedTsTracker {
    pub fn new() -> Self {
        Self {
            spans: RwLock::new(HashMap::new()),
            published: AtomicU64::new(MAX_TS),
            next_generation: AtomicU64::new(0),
        }
    }

    // The map only holds plain integers, so a poisoned lock is still consistent
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Span, SpanState>> {
        self.spans.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Span, SpanState>> {
        self.spans.write().unwrap_or_else(|e| e.into_inner())
    }

    fn min_flushed(spans: &HashMap<Span, SpanState>) -> Ts {
        spans.values().map(|s| s.flushed).min().unwrap_or(MAX_TS)
    }

    /// Start tracking `span` at `ts`, replacing any previous entry.
    ///
    /// Returns the span's new generation. The minimum is republished at
    /// once, so it may drop.
    pub fn add(&self, span: Span, ts: Ts) -> u64 {
        let mut spans = self.write();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        spans.insert(
            span,
            SpanState {
                unflushed: ts,
                flushed: ts,
                generation,
            },
        );
        self.published
            .store(Self::min_flushed(&spans), Ordering::Release);
        generation
    }

    /// Stop tracking `span`. Returns whether it was tracked.
    pub fn remove(&self, span: &Span) -> bool {
        let mut spans = self.write();
        let removed = spans.remove(span).is_some();
        if removed {
            self.published
                .store(Self::min_flushed(&spans), Ordering::Release);
        }
        removed
    }

    /// Raise the unflushed ts of `span`. Unknown spans and values not above
    /// the current one are ignored. Returns whether it advanced.
    pub fn update_ts(&self, span: &Span, ts: Ts) -> bool {
        let mut spans = self.write();
        match spans.get_mut(span) {
            Some(state) if ts > state.unflushed => {
                state.unflushed = ts;
                true
            }
            _ => false,
        }
    }

    /// Like `update_ts`, but only when the span is still at `generation`
    pub fn update_ts_if_current(&self, span: &Span, generation: u64, ts: Ts) -> bool {
        let mut spans = self.write();
        match spans.get_mut(span) {
            Some(state) if state.generation == generation && ts > state.unflushed => {
                state.unflushed = ts;
                true
            }
            _ => false,
        }
    }

    pub fn generation(&self, span: &Span) -> Option<u64> {
        self.read().get(span).map(|s| s.generation)
    }

    pub fn contains(&self, span: &Span) -> bool {
        self.read().contains_key(span)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy every unflushed ts under one lock acquisition
    pub fn snapshot_for_flush(&self) -> FlushSnapshot {
        let spans = self.read();
        let mut snapshot = HashMap::with_capacity(spans.len());
        let mut generations = HashMap::with_capacity(spans.len());
        for (span, state) in spans.iter() {
            snapshot.insert(span.clone(), state.unflushed);
            generations.insert(span.clone(), state.generation);
        }
        let min_ts = snapshot.values().copied().min().unwrap_or(MAX_TS);
        FlushSnapshot {
            spans: snapshot,
            min_ts,
            generations,
        }
    }

    /// Mark `snapshot` durable and publish the new minimum.
    ///
    /// Spans removed (or removed and re-added) since the snapshot are
    /// skipped. Returns the published value.
    pub fn publish_flushed(&self, snapshot: &FlushSnapshot) -> Ts {
        let mut spans = self.write();
        for (span, ts) in &snapshot.spans {
            let captured = snapshot.generations.get(span).copied();
            if let Some(state) = spans.get_mut(span) {
                if captured == Some(state.generation) {
                    state.flushed = state.flushed.max(*ts);
                }
            }
        }
        let min = Self::min_flushed(&spans);
        self.published.store(min, Ordering::Release);
        min
    }

    /// Last published minimum; never blocks
    pub fn min_resolved_ts(&self) -> Ts {
        self.published.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker() {
        let tracker = ResolvedTsTracker::new();
        let snapshot = tracker.snapshot_for_flush();
        assert!(snapshot.spans.is_empty());
        assert_eq!(snapshot.min_ts, MAX_TS);
        assert_eq!(tracker.publish_flushed(&snapshot), MAX_TS);
        assert_eq!(tracker.min_resolved_ts(), MAX_TS);
    }

    #[test]
    fn test_watermark_sequence() {
        let tracker = ResolvedTsTracker::new();
        let span1 = Span::for_table(1);
        let span2 = Span::for_table(2);

        tracker.add(span1.clone(), 10);
        tracker.add(span2.clone(), 20);
        let snapshot = tracker.snapshot_for_flush();
        assert_eq!(snapshot.spans.len(), 2);
        assert_eq!(snapshot.min_ts, 10);
        tracker.publish_flushed(&snapshot);
        assert_eq!(tracker.min_resolved_ts(), 10);

        // Removing raises the minimum at once
        tracker.remove(&span1);
        assert_eq!(tracker.min_resolved_ts(), 20);

        // Re-adding may lower it
        tracker.add(span1.clone(), 10);
        assert_eq!(tracker.min_resolved_ts(), 10);

        tracker.update_ts(&span1, 30);
        let snapshot = tracker.snapshot_for_flush();
        assert_eq!(snapshot.min_ts, 20);
        assert_eq!(tracker.publish_flushed(&snapshot), 20);

        tracker.remove(&span1);
        tracker.remove(&span2);
        assert_eq!(tracker.min_resolved_ts(), MAX_TS);
    }

    #[test]
    fn test_update_is_monotonic_and_ignores_unknown() {
        let tracker = ResolvedTsTracker::new();
        let span = Span::for_table(5);
        tracker.add(span.clone(), 100);

        assert!(tracker.update_ts(&span, 150));
        assert!(!tracker.update_ts(&span, 120));
        assert!(!tracker.update_ts(&span, 150));
        assert!(!tracker.update_ts(&Span::for_table(6), 500));

        assert_eq!(tracker.snapshot_for_flush().spans[&span], 150);
        assert!(!tracker.contains(&Span::for_table(6)));
    }

    #[test]
    fn test_unflushed_is_not_visible_until_published() {
        let tracker = ResolvedTsTracker::new();
        let span = Span::for_table(1);
        tracker.add(span.clone(), 100);
        tracker.update_ts(&span, 200);
        assert_eq!(tracker.min_resolved_ts(), 100);

        let snapshot = tracker.snapshot_for_flush();
        assert_eq!(tracker.publish_flushed(&snapshot), 200);
    }

    #[test]
    fn test_publish_skips_removed_spans() {
        let tracker = ResolvedTsTracker::new();
        let kept = Span::for_table(1);
        let removed = Span::for_table(2);
        tracker.add(kept.clone(), 100);
        tracker.add(removed.clone(), 50);
        tracker.update_ts(&kept, 150);

        let snapshot = tracker.snapshot_for_flush();
        tracker.remove(&removed);
        assert_eq!(tracker.publish_flushed(&snapshot), 150);
        assert!(!tracker.contains(&removed));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_publish_skips_span_re_added_after_snapshot() {
        let tracker = ResolvedTsTracker::new();
        let span = Span::for_table(1);
        tracker.add(span.clone(), 100);
        tracker.update_ts(&span, 500);

        let snapshot = tracker.snapshot_for_flush();
        tracker.remove(&span);
        tracker.add(span.clone(), 100);

        // The new entry has flushed nothing yet
        assert_eq!(tracker.publish_flushed(&snapshot), 100);
    }

    #[test]
    fn test_generation_guards_stale_updates() {
        let tracker = ResolvedTsTracker::new();
        let span = Span::for_table(1);
        let first = tracker.add(span.clone(), 10);
        tracker.remove(&span);
        let second = tracker.add(span.clone(), 10);
        assert_ne!(first, second);
        assert_eq!(tracker.generation(&span), Some(second));

        assert!(!tracker.update_ts_if_current(&span, first, 99));
        assert!(tracker.update_ts_if_current(&span, second, 20));
    }

    #[test]
    fn test_flushed_never_regresses_on_publish() {
        let tracker = ResolvedTsTracker::new();
        let span = Span::for_table(1);
        tracker.add(span.clone(), 100);
        tracker.update_ts(&span, 200);
        let newer = tracker.snapshot_for_flush();
        let mut older = newer.clone();
        older.spans.insert(span.clone(), 150);

        tracker.publish_flushed(&newer);
        assert_eq!(tracker.publish_flushed(&older), 200);
    }
}
