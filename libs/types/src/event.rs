//! Validated activity event records
//!
//! An `EventRecord` is the unit of ingestion: one user-activity observation
//! (route view, click, error) submitted by a producer. Validation is
//! per-record: a batch is filtered, never rejected wholesale, so one
//! malformed record cannot block its siblings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action value that marks an event as an error occurrence.
pub const ERROR_ACTION: &str = "error";

/// A validated activity event.
///
/// `event_id` is the idempotency key for durable storage; duplicates are
/// rejected there but still counted by the in-memory aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Opaque producer-assigned unique identifier.
    pub event_id: String,
    /// Producer timestamp, integer milliseconds since epoch. Preserved in
    /// storage but not used for bucket assignment.
    pub ts: i64,
    /// May be empty (anonymous). Only non-empty ids count toward uniques.
    #[serde(default)]
    pub user_id: String,
    pub session_id: String,
    pub route: String,
    pub action: String,
    /// Opaque producer metadata; not interpreted by the pipeline.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EventRecord {
    /// Validate a raw JSON record.
    ///
    /// Returns `None` when any field is missing, mistyped, or violates the
    /// non-empty rules. An absent `metadata` becomes an empty object; an
    /// absent `userId` becomes the empty string.
    pub fn from_value(value: Value) -> Option<Self> {
        let record: EventRecord = serde_json::from_value(value).ok()?;
        if record.event_id.is_empty()
            || record.ts < 0
            || record.session_id.is_empty()
            || record.route.is_empty()
            || record.action.is_empty()
        {
            return None;
        }
        Some(record)
    }

    /// Whether this event increments the error counter.
    pub fn is_error(&self) -> bool {
        self.action == ERROR_ACTION
    }
}

/// Filter a raw batch down to its valid records, dropping the rest silently.
pub fn filter_batch(values: Vec<Value>) -> Vec<EventRecord> {
    values.into_iter().filter_map(EventRecord::from_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_value() -> Value {
        json!({
            "eventId": "A",
            "ts": 1000,
            "userId": "u1",
            "sessionId": "s1",
            "route": "/",
            "action": "view",
            "metadata": {}
        })
    }

    #[test]
    fn test_valid_record_parses() {
        let record = EventRecord::from_value(valid_value()).unwrap();
        assert_eq!(record.event_id, "A");
        assert_eq!(record.ts, 1000);
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.route, "/");
        assert!(!record.is_error());
    }

    #[test]
    fn test_missing_metadata_defaults_to_empty_object() {
        let mut value = valid_value();
        value.as_object_mut().unwrap().remove("metadata");
        let record = EventRecord::from_value(value).unwrap();
        assert!(record.metadata.is_empty());
    }

    #[test]
    fn test_missing_user_id_defaults_to_empty() {
        let mut value = valid_value();
        value.as_object_mut().unwrap().remove("userId");
        let record = EventRecord::from_value(value).unwrap();
        assert_eq!(record.user_id, "");
    }

    #[test]
    fn test_missing_session_id_rejected() {
        let mut value = valid_value();
        value.as_object_mut().unwrap().remove("sessionId");
        assert!(EventRecord::from_value(value).is_none());
    }

    #[test]
    fn test_empty_required_fields_rejected() {
        for field in ["eventId", "sessionId", "route", "action"] {
            let mut value = valid_value();
            value.as_object_mut().unwrap()[field] = json!("");
            assert!(
                EventRecord::from_value(value).is_none(),
                "empty {field} should be rejected"
            );
        }
    }

    #[test]
    fn test_negative_ts_rejected() {
        let mut value = valid_value();
        value.as_object_mut().unwrap()["ts"] = json!(-1);
        assert!(EventRecord::from_value(value).is_none());
    }

    #[test]
    fn test_non_integer_ts_rejected() {
        let mut value = valid_value();
        value.as_object_mut().unwrap()["ts"] = json!(1000.5);
        assert!(EventRecord::from_value(value).is_none());
    }

    #[test]
    fn test_non_object_metadata_rejected() {
        let mut value = valid_value();
        value.as_object_mut().unwrap()["metadata"] = json!("nope");
        assert!(EventRecord::from_value(value).is_none());
    }

    #[test]
    fn test_non_object_record_rejected() {
        assert!(EventRecord::from_value(json!("event")).is_none());
        assert!(EventRecord::from_value(json!(42)).is_none());
        assert!(EventRecord::from_value(json!(null)).is_none());
    }

    #[test]
    fn test_error_action() {
        let mut value = valid_value();
        value.as_object_mut().unwrap()["action"] = json!("error");
        assert!(EventRecord::from_value(value).unwrap().is_error());
    }

    #[test]
    fn test_filter_batch_drops_only_invalid() {
        let mut broken = valid_value();
        broken.as_object_mut().unwrap().remove("sessionId");

        let batch = vec![valid_value(), broken, json!(17)];
        let filtered = filter_batch(batch);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].event_id, "A");
    }
}
