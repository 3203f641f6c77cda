// src/server/state.rs

//! Shared per-process state handed to every handler.

use crate::config::Config;
use crate::core::auth::{AuthService, TokenSigner};
use crate::core::batch::BatchManager;
use crate::core::ingest::IngestEngine;
use crate::core::isn::IsnAdmin;
use crate::core::public_cache::PublicIsnCache;
use crate::core::schema::SchemaCache;
use crate::core::search::SignalSearchService;
use crate::core::signal_types::SignalTypeRegistry;
use crate::core::store::Store;
use crate::core::webhook::{BatchClosureHook, NoopClosureHook};
use crate::server::middleware::RateLimiter;
use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub signer: Arc<TokenSigner>,
    pub auth: AuthService,
    pub ingest: IngestEngine,
    pub search: SignalSearchService,
    pub signal_types: SignalTypeRegistry,
    pub isn_admin: IsnAdmin,
    pub batches: BatchManager,
    pub schema_cache: Arc<SchemaCache>,
    pub public_cache: Arc<PublicIsnCache>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Arc<Self> {
        Self::with_closure_hook(config, store, Arc::new(NoopClosureHook))
    }

    pub fn with_closure_hook(
        config: Config,
        store: Arc<dyn Store>,
        closure_hook: Arc<dyn BatchClosureHook>,
    ) -> Arc<Self> {
        let signer = Arc::new(TokenSigner::new(&config.secret_key));
        let schema_cache = Arc::new(SchemaCache::new(store.clone()));
        let public_cache = Arc::new(PublicIsnCache::new());
        let rate_limiter = RateLimiter::new(config.rate_limit_rps, config.rate_limit_burst);
        Arc::new(Self {
            auth: AuthService::new(store.clone(), signer.clone()),
            ingest: IngestEngine::new(store.clone(), schema_cache.clone()),
            search: SignalSearchService::new(store.clone()),
            signal_types: SignalTypeRegistry::new(store.clone(), public_cache.clone()),
            isn_admin: IsnAdmin::new(store.clone(), public_cache.clone()),
            batches: BatchManager::new(store.clone(), closure_hook),
            schema_cache,
            public_cache,
            rate_limiter,
            signer,
            store,
            config,
        })
    }
}
