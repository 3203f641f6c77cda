// src/core/schema/fetcher.rs

//! Fetches and compiles JSON Schema documents from their version-pinned
//! GitHub references. The sentinel URL skips fetching entirely and yields
//! the empty (accept-all) schema.

use crate::core::SignalsdError;
use crate::core::ident::{is_skip_validation_url, validate_schema_url};
use std::time::Duration;
use tracing::debug;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SchemaFetcher {
    client: reqwest::Client,
}

impl Default for SchemaFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { client }
    }

    /// Fetches the schema document behind an allow-listed URL, verifies it
    /// parses and compiles, and returns its text. The sentinel URL returns
    /// `{}` without touching the network.
    pub async fn fetch_schema(&self, schema_url: &str) -> Result<String, SignalsdError> {
        if is_skip_validation_url(schema_url) {
            return Ok("{}".to_string());
        }
        validate_schema_url(schema_url)?;

        let raw_url = blob_to_raw_url(schema_url);
        debug!(url = %raw_url, "fetching schema document");
        let response = self.client.get(&raw_url).send().await?;
        if !response.status().is_success() {
            return Err(SignalsdError::MalformedBody(format!(
                "schema fetch from {schema_url} returned HTTP {}",
                response.status()
            )));
        }
        let text = response.text().await?;

        let document: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            SignalsdError::MalformedBody(format!("schema at {schema_url} is not valid JSON: {e}"))
        })?;
        compile_schema(&document)?;
        Ok(text)
    }
}

/// Compiles a schema document, honouring the draft its `$schema` keyword
/// selects. The empty document compiles to the permissive validator.
pub fn compile_schema(document: &serde_json::Value) -> Result<jsonschema::Validator, SignalsdError> {
    jsonschema::validator_for(document)
        .map_err(|e| SignalsdError::MalformedBody(format!("schema does not compile: {e}")))
}

/// Rewrites a GitHub `blob` URL to its raw-content equivalent, which serves
/// the document body rather than an HTML page.
fn blob_to_raw_url(url: &str) -> String {
    url.replacen("https://github.com/", "https://raw.githubusercontent.com/", 1)
        .replacen("/blob/", "/", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_url_rewrites_to_raw() {
        assert_eq!(
            blob_to_raw_url("https://github.com/org/repo/blob/v1.2.0/schemas/s.json"),
            "https://raw.githubusercontent.com/org/repo/v1.2.0/schemas/s.json"
        );
    }
}
