//! Background expiration of stale assumptions.
//!
//! The worker periodically sweeps the cache for assumed workloads whose
//! binding finished but whose confirmation never arrived, releasing their
//! host reservations. It runs until the shutdown signal flips.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cache::PlacementCache;

/// Worker driving [`PlacementCache::cleanup_expired`] on a fixed period.
pub struct ExpirationWorker {
    cache: Arc<PlacementCache>,
    period: Duration,
}

impl ExpirationWorker {
    /// Create a worker using the cache's configured cleanup period.
    pub fn new(cache: Arc<PlacementCache>) -> Self {
        let period = cache.config().cleanup_period;
        Self { cache, period }
    }

    /// Run the sweep loop until shutdown is signaled. Terminates at the
    /// next tick boundary; a sweep in progress is never interrupted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            period_ms = self.period.as_millis() as u64,
            "Starting expiration worker"
        );

        let mut interval = tokio::time::interval(self.period);
        // Don't sweep immediately on startup - wait for the first period.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = self.cache.cleanup_expired(Utc::now()).await;
                    if evicted > 0 {
                        debug!(evicted, "Expired assumed workloads");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Expiration worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;

    #[test]
    fn test_worker_uses_configured_period() {
        let cache = Arc::new(PlacementCache::new(CacheConfig {
            cleanup_period: Duration::from_millis(250),
            ..Default::default()
        }));
        let worker = ExpirationWorker::new(cache);
        assert_eq!(worker.period, Duration::from_millis(250));
    }
}
