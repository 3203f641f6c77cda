// src/core/webhook.rs

//! The outbound batch-closure webhook port. Only the interface lives here;
//! the default implementation does nothing.

use crate::core::model::SignalBatch;
use async_trait::async_trait;

#[async_trait]
pub trait BatchClosureHook: Send + Sync {
    /// Called after a batch has been closed and the transaction committed.
    async fn batch_closed(&self, batch: &SignalBatch);
}

pub struct NoopClosureHook;

#[async_trait]
impl BatchClosureHook for NoopClosureHook {
    async fn batch_closed(&self, _batch: &SignalBatch) {}
}
