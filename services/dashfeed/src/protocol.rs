//! Wire frames for the streaming endpoint
//!
//! Inbound frames are text JSON tagged by `type`. Anything else (unknown
//! tags, parse failures, non-text messages) is ignored silently at the
//! session layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregator::WindowViews;

/// The fan-out channel every dashboard subscribes to.
pub const DASHBOARD_TOPIC: &str = "dashboard:global";

/// Client → server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Subscribe the session to a topic; answered with an `agg_snapshot`.
    Subscribe { topic: String },
    /// Submit an event batch over the persistent connection.
    Events { events: Vec<Value> },
}

/// Server → client frames.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame<'a> {
    AggSnapshot { data: &'a WindowViews },
    AggDelta { data: &'a WindowViews },
}

impl OutboundFrame<'_> {
    /// Serialized wire form. These shapes cannot fail to serialize.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
