//! Rolling-window aggregation
//!
//! Maintains sliding buckets keyed by `(window, bucket start)` across the
//! fixed 1s / 5s / 60s window set. Every ingested batch updates the active
//! bucket of each window; the returned views serialize the active bucket
//! only, not a sum across the horizon, so delta payloads stay O(1) and a
//! dropped frame is fully recovered by the next one.
//!
//! Bucket assignment uses receipt time. The producer's `ts` is preserved in
//! persistence but never consulted here.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use types::event::EventRecord;
use types::window::Window;

/// Maximum number of route tallies included in a serialized view.
pub const TOP_ROUTES: usize = 10;

#[derive(Debug)]
struct RouteTally {
    count: u64,
    /// Insertion ordinal inside the bucket; breaks count ties (first seen
    /// wins).
    first_seen: u64,
}

/// One aggregation cell: all events received inside a single window-aligned
/// time slice.
#[derive(Debug, Default)]
pub struct Bucket {
    count: u64,
    uniques: BTreeSet<String>,
    routes: BTreeMap<String, RouteTally>,
    errors: u64,
    next_ordinal: u64,
}

impl Bucket {
    fn apply(&mut self, event: &EventRecord) {
        self.count += 1;
        if !event.user_id.is_empty() {
            self.uniques.insert(event.user_id.clone());
        }
        let ordinal = self.next_ordinal;
        let tally = match self.routes.entry(event.route.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.next_ordinal += 1;
                entry.insert(RouteTally {
                    count: 0,
                    first_seen: ordinal,
                })
            }
        };
        tally.count += 1;
        if event.is_error() {
            self.errors += 1;
        }
    }

    fn view(&self) -> BucketView {
        let mut ranked: Vec<(&String, &RouteTally)> = self.routes.iter().collect();
        ranked.sort_by(|a, b| {
            b.1.count
                .cmp(&a.1.count)
                .then(a.1.first_seen.cmp(&b.1.first_seen))
        });

        BucketView {
            count: self.count,
            uniques: self.uniques.len(),
            routes: ranked
                .into_iter()
                .take(TOP_ROUTES)
                .map(|(route, tally)| (route.clone(), tally.count))
                .collect(),
            errors: self.errors,
        }
    }
}

/// Serialized bucket state: `routes` is the top-10 `[route, count]` pairs,
/// ordered by count descending, first-seen on ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketView {
    pub count: u64,
    pub uniques: usize,
    pub routes: Vec<(String, u64)>,
    pub errors: u64,
}

impl BucketView {
    fn empty() -> Self {
        Self {
            count: 0,
            uniques: 0,
            routes: Vec::new(),
            errors: 0,
        }
    }
}

/// Active-bucket views keyed by window label (`"1s"`, `"5s"`, `"60s"`).
pub type WindowViews = BTreeMap<&'static str, BucketView>;

/// Per-window bucket maps. Not thread-safe on its own; see
/// [`SharedAggregator`].
#[derive(Debug)]
pub struct WindowAggregator {
    windows: BTreeMap<Window, BTreeMap<i64, Bucket>>,
}

impl WindowAggregator {
    pub fn new() -> Self {
        Self {
            windows: Window::ALL.iter().map(|w| (*w, BTreeMap::new())).collect(),
        }
    }

    /// Apply a batch at receipt time `now_ms` and return each window's
    /// active-bucket view. The batch is applied atomically from the caller's
    /// perspective: the views reflect every record.
    pub fn ingest(&mut self, events: &[EventRecord], now_ms: i64) -> WindowViews {
        for window in Window::ALL {
            let bucket = self
                .windows
                .entry(window)
                .or_default()
                .entry(window.bucket_start(now_ms))
                .or_default();
            for event in events {
                bucket.apply(event);
            }
        }
        self.views(now_ms)
    }

    /// Active-bucket views at `now_ms` without mutating state. Windows with
    /// no active bucket serialize as zeroes.
    pub fn snapshot(&self, now_ms: i64) -> WindowViews {
        self.views(now_ms)
    }

    /// Delete buckets older than the five-bucket horizon. Returns how many
    /// were removed.
    pub fn evict(&mut self, now_ms: i64) -> usize {
        let mut removed = 0;
        for (window, buckets) in &mut self.windows {
            let floor = window.horizon_floor(now_ms);
            let before = buckets.len();
            buckets.retain(|start, _| *start >= floor);
            removed += before - buckets.len();
        }
        removed
    }

    /// Total buckets currently held across all windows.
    pub fn bucket_count(&self) -> usize {
        self.windows.values().map(BTreeMap::len).sum()
    }

    fn views(&self, now_ms: i64) -> WindowViews {
        Window::ALL
            .iter()
            .map(|window| {
                let view = self
                    .windows
                    .get(window)
                    .and_then(|buckets| buckets.get(&window.bucket_start(now_ms)))
                    .map(Bucket::view)
                    .unwrap_or_else(BucketView::empty);
                (window.label(), view)
            })
            .collect()
    }
}

impl Default for WindowAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregator handle shared by both ingestion transports and the janitor.
///
/// A single lock covers all window maps, which also makes batch application
/// and eviction mutually atomic.
#[derive(Clone)]
pub struct SharedAggregator(Arc<Mutex<WindowAggregator>>);

impl SharedAggregator {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(WindowAggregator::new())))
    }

    pub fn lock(&self) -> MutexGuard<'_, WindowAggregator> {
        // Bucket counters stay consistent even if a holder panicked.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SharedAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn event(id: &str, user: &str, route: &str, action: &str) -> EventRecord {
        EventRecord::from_value(json!({
            "eventId": id,
            "ts": 1_000,
            "userId": user,
            "sessionId": "s1",
            "route": route,
            "action": action,
        }))
        .unwrap()
    }

    #[test]
    fn test_single_event_all_windows() {
        let mut agg = WindowAggregator::new();
        let views = agg.ingest(&[event("A", "u1", "/", "view")], NOW);

        for label in ["1s", "5s", "60s"] {
            let view = &views[label];
            assert_eq!(view.count, 1, "{label}");
            assert_eq!(view.uniques, 1, "{label}");
            assert_eq!(view.routes, vec![("/".to_string(), 1)], "{label}");
            assert_eq!(view.errors, 0, "{label}");
        }
    }

    #[test]
    fn test_error_action_counted() {
        let mut agg = WindowAggregator::new();
        let batch = [
            event("A", "u1", "/", "view"),
            event("B", "u1", "/", "click"),
            event("C", "u1", "/", "error"),
        ];
        let views = agg.ingest(&batch, NOW);

        for label in ["1s", "5s", "60s"] {
            let view = &views[label];
            assert_eq!(view.count, 3);
            assert_eq!(view.uniques, 1);
            assert_eq!(view.errors, 1);
        }
    }

    #[test]
    fn test_empty_user_id_not_unique() {
        let mut agg = WindowAggregator::new();
        let batch = [event("A", "", "/", "view"), event("B", "u1", "/", "view")];
        let views = agg.ingest(&batch, NOW);
        assert_eq!(views["1s"].count, 2);
        assert_eq!(views["1s"].uniques, 1);
    }

    #[test]
    fn test_top_routes_ordering() {
        let mut agg = WindowAggregator::new();
        let mut batch = Vec::new();
        for i in 0..5 {
            batch.push(event(&format!("a{i}"), "u1", "/a", "view"));
        }
        for i in 0..3 {
            batch.push(event(&format!("b{i}"), "u1", "/b", "view"));
        }
        for i in 0..4 {
            batch.push(event(&format!("c{i}"), "u1", "/c", "view"));
        }

        let views = agg.ingest(&batch, NOW);
        assert_eq!(
            views["1s"].routes,
            vec![
                ("/a".to_string(), 5),
                ("/c".to_string(), 4),
                ("/b".to_string(), 3),
            ]
        );
    }

    #[test]
    fn test_route_ties_resolved_first_seen() {
        let mut agg = WindowAggregator::new();
        let batch = [
            event("1", "u1", "/z", "view"),
            event("2", "u1", "/a", "view"),
        ];
        let views = agg.ingest(&batch, NOW);
        // Equal counts; /z was seen first.
        assert_eq!(
            views["1s"].routes,
            vec![("/z".to_string(), 1), ("/a".to_string(), 1)]
        );
    }

    #[test]
    fn test_top_routes_truncated_to_ten() {
        let mut agg = WindowAggregator::new();
        let mut batch = Vec::new();
        for i in 0..12 {
            batch.push(event(&format!("e{i}"), "u1", &format!("/r{i}"), "view"));
        }
        let views = agg.ingest(&batch, NOW);
        assert_eq!(views["1s"].routes.len(), TOP_ROUTES);
        // All tied at 1, so insertion order decides the cut.
        assert_eq!(views["1s"].routes[0].0, "/r0");
        assert_eq!(views["1s"].routes[9].0, "/r9");
    }

    #[test]
    fn test_bucket_invariants_hold() {
        let mut agg = WindowAggregator::new();
        let mut batch = Vec::new();
        for i in 0..40 {
            let user = if i % 3 == 0 { String::new() } else { format!("u{}", i % 7) };
            let action = if i % 5 == 0 { "error" } else { "view" };
            batch.push(event(&format!("e{i}"), &user, &format!("/r{}", i % 4), action));
        }

        let views = agg.ingest(&batch, NOW);
        for (_, view) in &views {
            assert!(view.uniques as u64 <= view.count);
            assert!(view.errors <= view.count);
            // Fewer than TOP_ROUTES distinct routes here, so the tallies sum
            // to the full count.
            let route_sum: u64 = view.routes.iter().map(|(_, n)| n).sum();
            assert_eq!(route_sum, view.count);
        }
    }

    #[test]
    fn test_batches_accumulate_in_same_bucket() {
        let mut agg = WindowAggregator::new();
        agg.ingest(&[event("A", "u1", "/", "view")], NOW);
        let views = agg.ingest(&[event("A", "u1", "/", "view")], NOW + 100);
        // Same eventId twice: only storage dedupes, the live counters do not.
        assert_eq!(views["1s"].count, 2);
        assert_eq!(views["1s"].uniques, 1);
    }

    #[test]
    fn test_bucket_rolls_at_boundary() {
        let mut agg = WindowAggregator::new();
        agg.ingest(&[event("A", "u1", "/", "view")], NOW);
        let views = agg.ingest(&[event("B", "u2", "/", "view")], NOW + 1_000);
        // New 1s bucket; 60s bucket still accumulating.
        assert_eq!(views["1s"].count, 1);
        assert_eq!(views["60s"].count, 2);
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let mut agg = WindowAggregator::new();
        agg.ingest(&[event("A", "u1", "/", "view")], NOW);

        let first = agg.snapshot(NOW);
        let second = agg.snapshot(NOW);
        assert_eq!(first, second);
        assert_eq!(agg.bucket_count(), 3);
    }

    #[test]
    fn test_snapshot_outside_active_bucket_is_empty() {
        let mut agg = WindowAggregator::new();
        agg.ingest(&[event("A", "u1", "/", "view")], NOW);

        let views = agg.snapshot(NOW + 2_000);
        assert_eq!(views["1s"].count, 0);
        assert_eq!(views["60s"].count, 1);
    }

    #[test]
    fn test_evict_out_of_horizon() {
        let mut agg = WindowAggregator::new();
        agg.ingest(&[event("A", "u1", "/", "view")], NOW);
        assert_eq!(agg.bucket_count(), 3);

        // Past the 60s window's five-bucket horizon: everything goes.
        let removed = agg.evict(NOW + 5 * 60_000 + 1);
        assert_eq!(removed, 3);
        assert_eq!(agg.bucket_count(), 0);
        assert_eq!(agg.snapshot(NOW)["60s"].count, 0);
    }

    #[test]
    fn test_evict_keeps_horizon_buckets() {
        let mut agg = WindowAggregator::new();
        agg.ingest(&[event("A", "u1", "/", "view")], NOW);

        // 6s later: the 1s bucket is out of horizon, 5s and 60s remain.
        let removed = agg.evict(NOW + 6_000);
        assert_eq!(removed, 1);
        assert_eq!(agg.bucket_count(), 2);
    }

    #[test]
    fn test_evict_never_touches_active_bucket() {
        let mut agg = WindowAggregator::new();
        agg.ingest(&[event("A", "u1", "/", "view")], NOW);
        let removed = agg.evict(NOW);
        assert_eq!(removed, 0);
        assert_eq!(agg.snapshot(NOW)["1s"].count, 1);
    }

    #[test]
    fn test_shared_aggregator_round_trip() {
        let shared = SharedAggregator::new();
        shared.lock().ingest(&[event("A", "u1", "/", "view")], NOW);
        assert_eq!(shared.lock().snapshot(NOW)["5s"].count, 1);
    }
}
