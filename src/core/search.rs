// src/core/search.rs

//! Signal search: latest-version retrieval with optional correlated-signal
//! and previous-version fan-out, both keyed by the returned signal ids.

use crate::core::SignalsdError;
use crate::core::ident::SemVer;
use crate::core::model::SignalVersion;
use crate::core::store::{SignalSearchFilter, SignalWithLatest, Store};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Query-string parameters accepted by the search endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignalSearchQuery {
    pub account_id: Option<Uuid>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub signal_id: Option<Uuid>,
    pub local_ref: Option<String>,
    #[serde(default)]
    pub include_withdrawn: bool,
    #[serde(default)]
    pub include_correlated: bool,
    #[serde(default)]
    pub include_previous_versions: bool,
}

/// One search hit: the latest version plus any requested expansions.
#[derive(Debug, Clone, Serialize)]
pub struct SignalHit {
    #[serde(flatten)]
    pub signal: SignalWithLatest,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub correlated_signals: Vec<SignalWithLatest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub previous_versions: Vec<SignalVersion>,
}

pub struct SignalSearchService {
    store: Arc<dyn Store>,
}

impl SignalSearchService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Runs a search. `include_email` is false on the public variant, which
    /// strips submitter emails from the hits and their expansions.
    pub async fn search(
        &self,
        signal_type_slug: &str,
        sem_ver: SemVer,
        query: SignalSearchQuery,
        include_email: bool,
    ) -> Result<Vec<SignalHit>, SignalsdError> {
        let (start_date, end_date) = parse_date_range(&query)?;
        if start_date.is_none()
            && query.account_id.is_none()
            && query.signal_id.is_none()
            && query.local_ref.is_none()
        {
            return Err(SignalsdError::MalformedBody(
                "supply at least one of: date range, account_id, signal_id, local_ref"
                    .to_string(),
            ));
        }

        let filter = SignalSearchFilter {
            signal_type_slug: signal_type_slug.to_string(),
            sem_ver,
            account_id: query.account_id,
            start_date,
            end_date,
            signal_id: query.signal_id,
            local_ref: query.local_ref.clone(),
            include_withdrawn: query.include_withdrawn,
        };
        let mut base = self.store.search_signals(filter).await?;
        if !include_email {
            for hit in &mut base {
                hit.email = None;
            }
        }
        let ids: Vec<Uuid> = base.iter().map(|s| s.signal_id).collect();

        let mut correlated_by_target: HashMap<Uuid, Vec<SignalWithLatest>> = HashMap::new();
        if query.include_correlated && !ids.is_empty() {
            for mut correlated in self.store.correlated_signals(&ids).await? {
                if !include_email {
                    correlated.email = None;
                }
                let Some(target) = correlated.correlation_id else {
                    continue;
                };
                correlated_by_target.entry(target).or_default().push(correlated);
            }
        }

        let mut versions_by_signal: HashMap<Uuid, Vec<SignalVersion>> = HashMap::new();
        if query.include_previous_versions && !ids.is_empty() {
            for version in self.store.previous_versions(&ids).await? {
                versions_by_signal
                    .entry(version.signal_id)
                    .or_default()
                    .push(version);
            }
        }

        Ok(base
            .into_iter()
            .map(|signal| {
                let correlated_signals = correlated_by_target
                    .remove(&signal.signal_id)
                    .unwrap_or_default();
                let previous_versions = versions_by_signal
                    .remove(&signal.signal_id)
                    .unwrap_or_default();
                SignalHit {
                    signal,
                    correlated_signals,
                    previous_versions,
                }
            })
            .collect())
    }
}

fn parse_date_range(
    query: &SignalSearchQuery,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), SignalsdError> {
    match (&query.start_date, &query.end_date) {
        (None, None) => Ok((None, None)),
        (Some(start), Some(end)) => Ok((
            Some(parse_search_date(start)?),
            Some(parse_search_date(end)?),
        )),
        _ => Err(SignalsdError::MalformedBody(
            "start_date and end_date must be supplied together".to_string(),
        )),
    }
}

/// Accepts RFC 3339 timestamps with optional offset and fractional seconds;
/// a bare date is the start of that UTC day.
pub fn parse_search_date(raw: &str) -> Result<DateTime<Utc>, SignalsdError> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Ok(with_offset.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
        return Ok(midnight.and_utc());
    }
    Err(SignalsdError::MalformedBody(format!(
        "unparseable date {raw:?}; use RFC 3339 or YYYY-MM-DD"
    )))
}
