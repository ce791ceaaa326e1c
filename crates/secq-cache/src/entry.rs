//! Cached HTTP exchanges and the keys they are stored under.

use chrono::{DateTime, Utc};
use derive_more::{Display, Into};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Normalized form of a request URL.
///
/// Two URLs that differ only in fragment, letter case of scheme/host, an
/// explicit default port or the order of their query pairs map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Into, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the key for an already parsed URL.
    pub fn from_url(url: &Url) -> Self {
        let mut normalized = url.clone();
        normalized.set_fragment(None);

        let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        if pairs.is_empty() {
            normalized.set_query(None);
        } else {
            pairs.sort();
            normalized.query_pairs_mut().clear().extend_pairs(pairs);
        }

        Self(normalized.into())
    }

    /// Parse and normalize a URL string.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Url::parse(input).map(|url| Self::from_url(&url))
    }

    /// The normalized URL text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A completed HTTP exchange.
///
/// Entries are built once the whole body has been read, so a stored entry is
/// never partial. Whether an entry is still usable is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// When the response was received
    pub fetched_at: DateTime<Utc>,
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lowercased
    pub headers: BTreeMap<String, String>,
    /// Response body
    pub body: String,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(status: u16, headers: BTreeMap<String, String>, body: impl Into<String>) -> Self {
        Self {
            fetched_at: Utc::now(),
            status,
            headers,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Time elapsed since the entry was fetched. Entries stamped in the
    /// future (clock skew) report zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns true if the entry is younger than `ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) < ttl
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://data.sec.gov/x#frag", "https://data.sec.gov/x")]
    #[case("HTTPS://Data.SEC.gov/x", "https://data.sec.gov/x")]
    #[case("https://data.sec.gov:443/x", "https://data.sec.gov/x")]
    #[case("https://www.sec.gov/q?b=2&a=1", "https://www.sec.gov/q?a=1&b=2")]
    #[case("https://www.sec.gov/q?", "https://www.sec.gov/q")]
    fn test_key_normalization(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(CacheKey::parse(input).unwrap().as_str(), expected);
    }

    #[test]
    fn test_key_keeps_distinct_paths_apart() {
        let a = CacheKey::parse("https://data.sec.gov/submissions/CIK0000320193.json").unwrap();
        let b = CacheKey::parse("https://data.sec.gov/submissions/CIK0001657335.json").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_rejects_relative_url() {
        assert!(CacheKey::parse("/files/company_tickers.json").is_err());
    }

    #[test]
    fn test_entry_freshness() {
        let mut entry = CacheEntry::new(200, BTreeMap::new(), "{}");
        let now = Utc::now();
        entry.fetched_at = now - chrono::Duration::minutes(10);

        assert!(entry.is_fresh(Duration::from_secs(15 * 60), now));
        assert!(!entry.is_fresh(Duration::from_secs(5 * 60), now));
        assert!(entry.age(now) >= Duration::from_secs(600));
    }

    #[test]
    fn test_entry_from_future_has_zero_age() {
        let mut entry = CacheEntry::new(200, BTreeMap::new(), "");
        let now = Utc::now();
        entry.fetched_at = now + chrono::Duration::minutes(1);
        assert_eq!(entry.age(now), Duration::ZERO);
    }

    #[rstest]
    #[case(200, true)]
    #[case(204, true)]
    #[case(299, true)]
    #[case(301, false)]
    #[case(404, false)]
    #[case(429, false)]
    fn test_entry_success_range(#[case] status: u16, #[case] success: bool) {
        assert_eq!(CacheEntry::new(status, BTreeMap::new(), "").is_success(), success);
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let headers = BTreeMap::from([("retry-after".to_string(), "2".to_string())]);
        let entry = CacheEntry::new(429, headers, "");
        assert_eq!(entry.header("Retry-After"), Some("2"));
        assert_eq!(entry.header("content-type"), None);
    }
}
