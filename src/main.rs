// src/main.rs

//! The main entry point for the signalsd server application.

use anyhow::Result;
use signalsd::config::Config;
use signalsd::server;
use std::env;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();
    if args.contains(&"--version".to_string()) {
        println!("signalsd version {VERSION}");
        return Ok(());
    }

    // Configuration comes entirely from the environment. Exit early with a
    // readable message when it is incomplete; the server cannot run without
    // a secret and a database.
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level so operators can raise
    // verbosity per-module without touching the deployment config.
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    if let Err(e) = server::run(config).await {
        error!("server runtime error: {}", e);
        return Err(e);
    }
    Ok(())
}
