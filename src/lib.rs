pub mod api;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod progress;
pub mod providers;
pub mod ratelimit;

use std::sync::Arc;

use bridge::ClientBridge;
use cache::{CacheSettings, SummaryCache};
use config::Config;
use orchestrator::Summarizer;
use progress::ProgressTracker;
use ratelimit::{RateLimitRule, RateLimiter};

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<SummaryCache>,
    pub limiter: Arc<RateLimiter>,
    pub progress: Arc<ProgressTracker>,
    pub summarizer: Arc<Summarizer>,
    pub bridge: Arc<ClientBridge>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let cache = Arc::new(SummaryCache::new(CacheSettings {
            ttl_ms: config.cache_ttl_ms,
            priority_mode: false,
        }));
        let limiter = Arc::new(RateLimiter::new(RateLimitRule {
            max_requests: config.rate_limit_max,
            window_ms: config.rate_limit_window_ms,
        }));
        let progress = Arc::new(ProgressTracker::new());
        let summarizer = Arc::new(Summarizer::new(
            cache.clone(),
            limiter.clone(),
            progress.clone(),
        ));
        Self {
            config: Arc::new(config),
            cache,
            limiter,
            progress,
            summarizer,
            bridge: Arc::new(ClientBridge::new()),
        }
    }
}
