//! Dashfeed: real-time event ingestion and fan-out
//!
//! Accepts activity events over two transports, maintains rolling
//! time-window aggregates in memory, and pushes incremental updates to
//! subscribed dashboard clients:
//!
//! ```text
//!  POST /ingest        ws /ws (events frame)
//!        │                  │
//!        └────────┬─────────┘
//!             ┌───▼────┐
//!             │Validate│  ← per-record filtering
//!             └───┬────┘
//!             ┌───▼────────┐
//!             │ Aggregator │  ← 1s / 5s / 60s buckets
//!             └───┬────┬───┘
//!                 │    └──────────────┐
//!          ┌──────▼───────┐   ┌───────▼───────┐
//!          │Topic Registry│   │  Persistence  │  (off the broadcast path)
//!          │  broadcast   │   │ raw + upserts │
//!          └──────────────┘   └───────────────┘
//! ```
//!
//! Subscribers receive a snapshot on subscribe, then a stream of deltas.
//! Slow subscribers lose deltas rather than stalling fast ones; deltas
//! carry absolute current-bucket state, so a dropped frame is recovered by
//! the next one.

pub mod aggregator;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod janitor;
pub mod persistence;
pub mod pipeline;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod state;
