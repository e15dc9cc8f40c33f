//! Receipt-time clock
//!
//! Bucket assignment uses the server's wall clock at the moment of
//! ingestion; producer timestamps are persisted but never trusted for
//! aggregation.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in integer milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
