//! Periodic eviction of out-of-horizon buckets
//!
//! A ticker-driven task that sweeps the window maps every few seconds and
//! deletes buckets past the five-bucket horizon. Eviction takes the same
//! aggregator lock as ingestion, so it cannot race an update to the active
//! bucket.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::aggregator::SharedAggregator;
use crate::clock;

/// Sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to the running sweep task.
pub struct Janitor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Janitor {
    pub fn spawn(aggregator: SharedAggregator) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = aggregator.lock().evict(clock::now_millis());
                        if removed > 0 {
                            debug!(removed, "evicted out-of-horizon buckets");
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        });
        Self { shutdown, handle }
    }

    /// Stop the sweep task and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_and_stop() {
        let janitor = Janitor::spawn(SharedAggregator::new());
        janitor.stop().await;
    }
}
