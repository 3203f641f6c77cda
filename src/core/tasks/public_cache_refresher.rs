// src/core/tasks/public_cache_refresher.rs

use crate::core::public_cache::PublicIsnCache;
use crate::core::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// How often the public-ISN cache is rebuilt. Newly published public signal
/// types become anonymously searchable within one period.
const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// A task that periodically rebuilds the public-ISN cache from the store.
pub struct PublicCacheRefreshTask {
    store: Arc<dyn Store>,
    cache: Arc<PublicIsnCache>,
}

impl PublicCacheRefreshTask {
    pub fn new(store: Arc<dyn Store>, cache: Arc<PublicIsnCache>) -> Self {
        Self { store, cache }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("public ISN cache refresh task started");
        let mut interval = tokio::time::interval(REFRESH_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.cache.refresh(&self.store).await {
                        warn!("public ISN cache refresh failed: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("public ISN cache refresh task shutting down");
                    return;
                }
            }
        }
    }
}
