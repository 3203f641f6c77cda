// src/core/ingest.rs

//! The signal ingest engine.
//!
//! Each signal in a submission runs in its own storage transaction, so one
//! bad signal never rolls back another. Request-level problems (shape,
//! permissions, missing service-account batch) terminate the request before
//! any signal is attempted; element-level problems are recorded to the
//! processing-failure ledger and surfaced in the response body.

use crate::core::SignalsdError;
use crate::core::auth::claims::AccessTokenClaims;
use crate::core::ident::SemVer;
use crate::core::model::{AccountType, FailureCode, Isn, SignalProcessingFailure};
use crate::core::schema::SchemaCache;
use crate::core::store::{SignalWrite, Store, StoredSignal};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// The wire shape of one submitted signal.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalEntry {
    #[serde(default)]
    pub local_ref: String,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// The wire shape of a batch submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalSubmission {
    #[serde(default)]
    pub signals: Vec<SignalEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedSignal {
    pub local_ref: String,
    pub error_code: FailureCode,
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub signal_batch_id: Uuid,
    pub stored_signals: Vec<StoredSignal>,
    pub failed_signals: Vec<FailedSignal>,
}

impl IngestOutcome {
    pub fn all_stored(&self) -> bool {
        self.failed_signals.is_empty()
    }

    pub fn none_stored(&self) -> bool {
        self.stored_signals.is_empty()
    }
}

pub struct IngestEngine {
    store: Arc<dyn Store>,
    schemas: Arc<SchemaCache>,
}

impl IngestEngine {
    pub fn new(store: Arc<dyn Store>, schemas: Arc<SchemaCache>) -> Self {
        Self { store, schemas }
    }

    pub async fn ingest(
        &self,
        claims: &AccessTokenClaims,
        isn: &Isn,
        signal_type_slug: &str,
        sem_ver: SemVer,
        submission: SignalSubmission,
    ) -> Result<IngestOutcome, SignalsdError> {
        validate_submission(&submission)?;
        let batch_id = self.resolve_batch(claims, isn).await?;

        let mut stored_signals: Vec<StoredSignal> = Vec::new();
        let mut failed_signals: Vec<FailedSignal> = Vec::new();

        for entry in submission.signals {
            // Schema validation happens before any transaction is opened; a
            // failed signal must never advance the version number.
            if let Err(e) = self
                .schemas
                .validate(signal_type_slug, sem_ver, &entry.content)
                .await
            {
                warn!(local_ref = %entry.local_ref, error = %e, "signal rejected by schema");
                let (error_code, error_message) = match e {
                    SignalsdError::MalformedBody(_) => {
                        (FailureCode::MalformedBody, "validation failed".to_string())
                    }
                    other => (FailureCode::InternalError, other.to_string()),
                };
                failed_signals.push(FailedSignal {
                    local_ref: entry.local_ref,
                    error_code,
                    error_message,
                });
                continue;
            }

            if let Some(correlation_id) = entry.correlation_id {
                match self.store.signal_in_isn(correlation_id, isn.id).await {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        failed_signals.push(FailedSignal {
                            local_ref: entry.local_ref,
                            error_code: FailureCode::InvalidCorrelationId,
                            error_message: format!(
                                "no signal {correlation_id} exists in this ISN"
                            ),
                        });
                        continue;
                    }
                    Err(e) => {
                        failed_signals.push(FailedSignal {
                            local_ref: entry.local_ref,
                            error_code: FailureCode::InternalError,
                            error_message: e.to_string(),
                        });
                        continue;
                    }
                }
            }

            let write = SignalWrite {
                account_id: claims.account_id(),
                signal_type_slug: signal_type_slug.to_string(),
                sem_ver,
                local_ref: entry.local_ref.clone(),
                correlation_id: entry.correlation_id,
                content: entry.content,
                batch_id,
            };
            match self.store.store_signal_version(write).await {
                Ok(receipt) => stored_signals.push(receipt),
                Err(e) => {
                    let error_code = match &e {
                        SignalsdError::InvalidCorrelationId(_) => FailureCode::InvalidCorrelationId,
                        SignalsdError::Database(_) => FailureCode::DatabaseError,
                        _ => FailureCode::InternalError,
                    };
                    failed_signals.push(FailedSignal {
                        local_ref: entry.local_ref,
                        error_code,
                        error_message: e.to_string(),
                    });
                }
            }
        }

        self.record_failures(batch_id, signal_type_slug, sem_ver, &failed_signals)
            .await;

        Ok(IngestOutcome {
            signal_batch_id: batch_id,
            stored_signals,
            failed_signals,
        })
    }

    /// For users the claimed batch id is advisory: a batch created after the
    /// token was minted wins, and a missing batch is created on first write.
    /// Service accounts must have opened a batch explicitly.
    async fn resolve_batch(
        &self,
        claims: &AccessTokenClaims,
        isn: &Isn,
    ) -> Result<Uuid, SignalsdError> {
        if let Some(batch_id) = claims
            .isn_perms
            .get(&isn.slug)
            .and_then(|c| c.signal_batch_id)
        {
            return Ok(batch_id);
        }
        match claims.account_type {
            AccountType::User => Ok(self
                .store
                .get_or_create_latest_batch(isn.id, claims.account_id())
                .await?
                .id),
            AccountType::ServiceAccount => Err(SignalsdError::Forbidden(
                "service accounts must open a batch before submitting signals".to_string(),
            )),
        }
    }

    /// Ledger writes happen after the per-signal transactions are done and
    /// must never turn a partial success into an error.
    async fn record_failures(
        &self,
        batch_id: Uuid,
        signal_type_slug: &str,
        sem_ver: SemVer,
        failed: &[FailedSignal],
    ) {
        for failure in failed {
            let row = SignalProcessingFailure {
                signal_batch_id: batch_id,
                signal_type_slug: signal_type_slug.to_string(),
                sem_ver,
                local_ref: failure.local_ref.clone(),
                error_code: failure.error_code,
                error_message: failure.error_message.clone(),
                created_at: Utc::now(),
            };
            if let Err(e) = self.store.record_processing_failure(row).await {
                warn!(local_ref = %failure.local_ref, error = %e,
                    "failed to record processing failure");
            }
        }
    }
}

fn validate_submission(submission: &SignalSubmission) -> Result<(), SignalsdError> {
    if submission.signals.is_empty() {
        return Err(SignalsdError::MalformedBody(
            "signals must be a non-empty array".to_string(),
        ));
    }
    for (index, entry) in submission.signals.iter().enumerate() {
        if entry.local_ref.is_empty() {
            return Err(SignalsdError::MalformedBody(format!(
                "signals[{index}] is missing local_ref"
            )));
        }
        if entry.content.is_null() {
            return Err(SignalsdError::MalformedBody(format!(
                "signals[{index}] has empty content"
            )));
        }
    }
    Ok(())
}
