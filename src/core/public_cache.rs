// src/core/public_cache.rs

//! The public-ISN cache: which `(ISN slug, signal-type path)` pairs may be
//! read without authentication.
//!
//! Rebuilt wholesale by the periodic refresher and on demand after
//! administrative mutations. Readers take the shared lock only; the writer
//! builds the replacement map before swapping it in, so the exclusive lock
//! is never held across I/O.

use crate::core::SignalsdError;
use crate::core::store::Store;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct PublicIsnCache {
    entries: RwLock<HashMap<String, HashSet<String>>>,
}

impl PublicIsnCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the signal-type path is publicly readable on the ISN.
    pub fn contains(&self, isn_slug: &str, signal_type_path: &str) -> bool {
        self.entries
            .read()
            .get(isn_slug)
            .is_some_and(|paths| paths.contains(signal_type_path))
    }

    /// True when the ISN itself is public, regardless of path.
    pub fn contains_isn(&self, isn_slug: &str) -> bool {
        self.entries.read().contains_key(isn_slug)
    }

    /// Full rebuild from the store. Returns the number of public paths.
    pub async fn refresh(&self, store: &Arc<dyn Store>) -> Result<usize, SignalsdError> {
        let pairs = store.public_isn_paths().await?;
        let mut replacement: HashMap<String, HashSet<String>> = HashMap::new();
        let count = pairs.len();
        for (isn_slug, path) in pairs {
            replacement.entry(isn_slug).or_default().insert(path);
        }
        *self.entries.write() = replacement;
        debug!(paths = count, "public ISN cache refreshed");
        Ok(count)
    }
}
