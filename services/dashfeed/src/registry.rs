//! Topic-based fan-out with backpressure tolerance
//!
//! Maps topics to subscriber connections and pushes serialized frames into
//! per-connection queues. Broadcasts are best-effort: a connection whose
//! outstanding queued bytes exceed the configured threshold is skipped for
//! that payload and reconciles through later deltas.
//!
//! Subscriptions live in a side table (`connection → topics`) rather than on
//! the connection itself, so teardown is a single registry call.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Items a connection's writer task drains from its queue.
pub enum Outbound {
    /// A serialized frame to forward as a text message.
    Frame(Arc<str>),
    /// Flush the remaining queue, send a close frame, and stop.
    Close,
}

/// Sending half of one connection's outbound queue.
///
/// `queued_bytes` tracks payload bytes accepted but not yet flushed to the
/// socket; the writer task decrements it after each send.
pub struct ConnHandle {
    id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
    queued_bytes: AtomicUsize,
}

impl ConnHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes.load(Ordering::Relaxed)
    }

    /// Mark `len` payload bytes as flushed to the socket.
    pub fn mark_flushed(&self, len: usize) {
        self.queued_bytes.fetch_sub(len, Ordering::Relaxed);
    }

    fn try_enqueue(&self, frame: Arc<str>, max_queued: usize) -> bool {
        let len = frame.len();
        if self.queued_bytes.load(Ordering::Relaxed).saturating_add(len) > max_queued {
            return false;
        }
        if self.tx.send(Outbound::Frame(frame)).is_err() {
            return false;
        }
        self.queued_bytes.fetch_add(len, Ordering::Relaxed);
        true
    }
}

/// Process-wide subscription state: `topic → subscribers` plus the
/// per-connection queues broadcasts write into.
pub struct TopicRegistry {
    topics: DashMap<String, BTreeSet<u64>>,
    subs: DashMap<u64, BTreeSet<String>>,
    conns: DashMap<u64, Arc<ConnHandle>>,
    next_id: AtomicU64,
    max_queued_bytes: usize,
    frames_sent: AtomicU64,
    frames_skipped: AtomicU64,
}

impl TopicRegistry {
    pub fn new(max_queued_bytes: usize) -> Self {
        Self {
            topics: DashMap::new(),
            subs: DashMap::new(),
            conns: DashMap::new(),
            next_id: AtomicU64::new(0),
            max_queued_bytes,
            frames_sent: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
        }
    }

    /// Register a connection. Returns its handle and the receiver half the
    /// writer task drains.
    pub fn register(&self) -> (Arc<ConnHandle>, mpsc::UnboundedReceiver<Outbound>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(ConnHandle {
            id,
            tx,
            queued_bytes: AtomicUsize::new(0),
        });
        self.conns.insert(id, handle.clone());
        (handle, rx)
    }

    /// Record a subscription. Idempotent; unknown connections are ignored.
    pub fn subscribe(&self, conn_id: u64, topic: &str) {
        if !self.conns.contains_key(&conn_id) {
            return;
        }
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(conn_id);
        self.subs
            .entry(conn_id)
            .or_default()
            .insert(topic.to_string());
    }

    /// Remove the connection from every topic it holds and forget its queue.
    /// Topics left empty are deleted.
    pub fn unsubscribe_all(&self, conn_id: u64) {
        if let Some((_, topics)) = self.subs.remove(&conn_id) {
            for topic in topics {
                if let Some(mut members) = self.topics.get_mut(&topic) {
                    members.remove(&conn_id);
                }
                self.topics.remove_if(&topic, |_, members| members.is_empty());
            }
        }
        self.conns.remove(&conn_id);
    }

    /// Enqueue an already-serialized frame for a single connection, subject
    /// to the backpressure gate.
    pub fn send_to(&self, conn: &ConnHandle, frame: Arc<str>) -> bool {
        if conn.try_enqueue(frame, self.max_queued_bytes) {
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.frames_skipped.fetch_add(1, Ordering::Relaxed);
            debug!(conn = conn.id, "skipping slow or closed connection");
            false
        }
    }

    /// Fan a frame out to every subscriber of `topic`. The frame is
    /// serialized once by the caller; subscribers over their queue threshold
    /// (or already gone) are skipped for this payload. Returns
    /// `(delivered, skipped)`.
    pub fn broadcast(&self, topic: &str, frame: Arc<str>) -> (usize, usize) {
        let member_ids: Vec<u64> = match self.topics.get(topic) {
            Some(members) => members.iter().copied().collect(),
            None => return (0, 0),
        };

        let mut delivered = 0;
        let mut skipped = 0;
        for id in member_ids {
            let sent = self
                .conns
                .get(&id)
                .is_some_and(|conn| conn.try_enqueue(frame.clone(), self.max_queued_bytes));
            if sent {
                delivered += 1;
            } else {
                skipped += 1;
            }
        }

        self.frames_sent.fetch_add(delivered as u64, Ordering::Relaxed);
        self.frames_skipped.fetch_add(skipped as u64, Ordering::Relaxed);
        if skipped > 0 {
            debug!(topic, skipped, "broadcast skipped lagging subscribers");
        }
        (delivered, skipped)
    }

    /// Ask every connection's writer to close once its queued frames drain.
    pub fn close_all(&self) {
        for entry in self.conns.iter() {
            let _ = entry.value().tx.send(Outbound::Close);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }
}
