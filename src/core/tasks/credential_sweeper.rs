// src/core/tasks/credential_sweeper.rs

use crate::core::store::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600); // 1 hour

/// A task that periodically deletes expired one-time client secrets and
/// password-reset tokens.
pub struct CredentialSweeperTask {
    store: Arc<dyn Store>,
}

impl CredentialSweeperTask {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("credential sweeper task started");
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.store.delete_expired_credentials(Utc::now()).await {
                        Ok(0) => debug!("credential sweep complete, nothing to remove"),
                        Ok(n) => info!("credential sweep removed {} expired entries", n),
                        Err(e) => warn!("credential sweep failed: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("credential sweeper task shutting down");
                    return;
                }
            }
        }
    }
}
