// src/server/mod.rs

//! Server assembly: store connection, shared state, background tasks, and
//! the HTTP serve loop with graceful shutdown.

pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use crate::config::Config;
use crate::core::store::{PostgresStore, Store};
use crate::core::tasks::{CredentialSweeperTask, PublicCacheRefreshTask};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub use routes::build_router;
pub use state::AppState;

/// How long outstanding handlers get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The main server startup function: connect, migrate, spawn background
/// tasks, serve until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let postgres =
        PostgresStore::connect(&config.database_url, config.database_max_connections).await?;
    postgres.run_migrations().await?;
    let store: Arc<dyn Store> = Arc::new(postgres);

    let state = AppState::new(config, store.clone());
    if let Err(e) = state.public_cache.refresh(&store).await {
        warn!("initial public ISN cache fill failed: {}", e);
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    tokio::spawn(
        PublicCacheRefreshTask::new(store.clone(), state.public_cache.clone())
            .run(shutdown_tx.subscribe()),
    );
    tokio::spawn(CredentialSweeperTask::new(store.clone()).run(shutdown_tx.subscribe()));

    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        "signalsd listening on http://{} (service mode: {})",
        addr, state.config.service_mode
    );

    let app = build_router(state);
    let mut serve_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = serve_shutdown.recv().await;
            })
            .await
    });

    wait_for_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(joined) => joined??,
        Err(_) => warn!(
            "handlers still outstanding after {:?}; shutting down anyway",
            SHUTDOWN_GRACE
        ),
    }
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
