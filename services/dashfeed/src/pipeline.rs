//! Shared ingestion pipeline
//!
//! Both transports feed validated batches through the same path: update the
//! window buckets, broadcast one delta frame carrying all three windows,
//! then hand the batch to persistence. Aggregation and the broadcast enqueue
//! happen under the aggregator lock, so deltas reach the topic in
//! lock-acquisition order; enqueueing is non-blocking, so nothing suspends
//! while the lock is held. Persistence runs in a spawned task and is never
//! awaited by the caller.

use std::sync::Arc;

use types::event::EventRecord;

use crate::aggregator::{SharedAggregator, WindowViews};
use crate::clock;
use crate::protocol::{OutboundFrame, DASHBOARD_TOPIC};
use crate::registry::TopicRegistry;
use crate::state::AppState;

/// Aggregate a batch at `now_ms` and broadcast the resulting delta to the
/// dashboard topic. Returns the views reflecting the batch.
pub fn aggregate_and_broadcast(
    aggregator: &SharedAggregator,
    registry: &TopicRegistry,
    events: &[EventRecord],
    now_ms: i64,
) -> WindowViews {
    let mut guard = aggregator.lock();
    let views = guard.ingest(events, now_ms);
    let frame: Arc<str> = OutboundFrame::AggDelta { data: &views }.to_json().into();
    registry.broadcast(DASHBOARD_TOPIC, frame);
    views
}

/// Full pipeline entry point used by the request and streaming endpoints.
pub fn publish_batch(state: &AppState, events: Vec<EventRecord>) -> WindowViews {
    let now_ms = clock::now_millis();
    let views = aggregate_and_broadcast(&state.aggregator, &state.registry, &events, now_ms);

    let store = state.store.clone();
    tokio::spawn(async move {
        store.record_batch(&events, now_ms).await;
    });

    views
}
