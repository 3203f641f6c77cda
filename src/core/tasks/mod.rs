// src/core/tasks/mod.rs

//! Long-running background tasks, each driven by an interval and a shutdown
//! broadcast.

pub mod credential_sweeper;
pub mod public_cache_refresher;

pub use credential_sweeper::CredentialSweeperTask;
pub use public_cache_refresher::PublicCacheRefreshTask;
