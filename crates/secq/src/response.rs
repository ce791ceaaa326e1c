//! The uniform response handed back to callers.

use chrono::{DateTime, Utc};
use secq_cache::CacheEntry;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Where a [`Response`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Fetched from the network for this call (or a call it joined)
    Network,
    /// Served from a cache entry younger than the requested TTL
    Cache,
    /// Served from an expired entry while a refresh runs in the background
    Stale,
}

/// Errors reading a response body.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The body is not valid JSON for the requested type
    #[error("Failed to decode JSON body (status {status}): {source}")]
    Json {
        /// Status of the response
        status: u16,
        /// Decoder error
        #[source]
        source: serde_json::Error,
    },
}

/// An HTTP response, identical in shape whether it came from the cache or
/// the network. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Response {
    entry: Arc<CacheEntry>,
    source: ResponseSource,
}

impl Response {
    pub(crate) const fn new(entry: Arc<CacheEntry>, source: ResponseSource) -> Self {
        Self { entry, source }
    }

    /// Returns true for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.entry.is_success()
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.entry.status
    }

    /// Response headers, names lowercased.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.entry.headers
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.entry.header(name)
    }

    /// Body text.
    pub fn text(&self) -> &str {
        &self.entry.body
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ResponseError> {
        serde_json::from_str(&self.entry.body).map_err(|source| ResponseError::Json {
            status: self.entry.status,
            source,
        })
    }

    /// Where the response came from.
    pub const fn source(&self) -> ResponseSource {
        self.source
    }

    /// When the underlying exchange completed.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.entry.fetched_at
    }

    /// The underlying cache entry.
    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Ticker {
        cik_str: u64,
        ticker: String,
    }

    fn response(status: u16, body: &str) -> Response {
        let headers = BTreeMap::from([(
            "content-type".to_string(),
            "application/json".to_string(),
        )]);
        Response::new(
            Arc::new(CacheEntry::new(status, headers, body)),
            ResponseSource::Network,
        )
    }

    #[test]
    fn test_json_decoding() {
        let resp = response(200, r#"{"cik_str":320193,"ticker":"AAPL"}"#);
        assert!(resp.ok());
        assert_eq!(
            resp.json::<Ticker>().unwrap(),
            Ticker {
                cik_str: 320193,
                ticker: "AAPL".to_string()
            }
        );
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["ticker"], "AAPL");
    }

    #[test]
    fn test_json_error_reports_status() {
        let resp = response(429, "Too Many Requests");
        assert!(!resp.ok());
        match resp.json::<serde_json::Value>() {
            Err(ResponseError::Json { status, .. }) => assert_eq!(status, 429),
            other => panic!("expected JSON error, got {other:?}"),
        }
    }

    #[test]
    fn test_accessors() {
        let resp = response(404, "missing");
        assert_eq!(resp.status(), 404);
        assert_eq!(resp.text(), "missing");
        assert_eq!(resp.header("Content-Type"), Some("application/json"));
        assert_eq!(resp.source(), ResponseSource::Network);
        assert_eq!(resp.entry().body, "missing");
    }
}
