use std::sync::Arc;

use crate::aggregator::SharedAggregator;
use crate::config::Config;
use crate::persistence::EventStore;
use crate::rate_limit::RateLimiter;
use crate::registry::TopicRegistry;

/// Process-wide shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub aggregator: SharedAggregator,
    pub registry: Arc<TopicRegistry>,
    pub store: Arc<EventStore>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, store: EventStore) -> Self {
        let registry = Arc::new(TopicRegistry::new(config.max_queue_bytes));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_sec));
        Self {
            config: Arc::new(config),
            aggregator: SharedAggregator::new(),
            registry,
            store: Arc::new(store),
            rate_limiter,
        }
    }
}
