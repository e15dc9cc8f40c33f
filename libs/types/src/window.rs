//! Rolling aggregation windows
//!
//! Buckets are aligned to epoch: for wall-clock instant `t` ms and window
//! `w`, the bucket start is `floor(t / (w * 1000)) * (w * 1000)`. All
//! assignment uses receipt time, never the producer timestamp.

use serde::{Deserialize, Serialize};

/// Number of trailing buckets retained per window before eviction.
pub const HORIZON_BUCKETS: i64 = 5;

/// The fixed set of rolling windows maintained by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Window {
    /// 1 second
    S1,
    /// 5 seconds
    S5,
    /// 60 seconds
    S60,
}

impl Window {
    /// All windows, smallest first.
    pub const ALL: [Window; 3] = [Window::S1, Window::S5, Window::S60];

    /// Window span in seconds.
    pub fn secs(self) -> i64 {
        match self {
            Window::S1 => 1,
            Window::S5 => 5,
            Window::S60 => 60,
        }
    }

    /// Window span in milliseconds.
    pub fn millis(self) -> i64 {
        self.secs() * 1_000
    }

    /// Payload key for this window.
    pub fn label(self) -> &'static str {
        match self {
            Window::S1 => "1s",
            Window::S5 => "5s",
            Window::S60 => "60s",
        }
    }

    /// Align a wall-clock instant to this window's bucket boundary (floor).
    pub fn bucket_start(self, now_ms: i64) -> i64 {
        (now_ms / self.millis()) * self.millis()
    }

    /// Oldest bucket start still inside the retention horizon at `now_ms`.
    pub fn horizon_floor(self, now_ms: i64) -> i64 {
        now_ms - HORIZON_BUCKETS * self.millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans() {
        assert_eq!(Window::S1.millis(), 1_000);
        assert_eq!(Window::S5.millis(), 5_000);
        assert_eq!(Window::S60.millis(), 60_000);
    }

    #[test]
    fn test_labels() {
        let labels: Vec<&str> = Window::ALL.iter().map(|w| w.label()).collect();
        assert_eq!(labels, vec!["1s", "5s", "60s"]);
    }

    #[test]
    fn test_bucket_start_floors_to_boundary() {
        let t = 1_700_000_123_456;
        assert_eq!(Window::S1.bucket_start(t), 1_700_000_123_000);
        assert_eq!(Window::S5.bucket_start(t), 1_700_000_120_000);
        assert_eq!(Window::S60.bucket_start(t), 1_700_000_100_000);
    }

    #[test]
    fn test_bucket_start_is_stable_within_bucket() {
        let start = Window::S5.bucket_start(10_000);
        for offset in [0, 1, 4_999] {
            assert_eq!(Window::S5.bucket_start(10_000 + offset), start);
        }
        assert_ne!(Window::S5.bucket_start(15_000), start);
    }

    #[test]
    fn test_horizon_floor() {
        let t = 1_000_000;
        assert_eq!(Window::S1.horizon_floor(t), t - 5_000);
        assert_eq!(Window::S60.horizon_floor(t), t - 300_000);
    }
}
