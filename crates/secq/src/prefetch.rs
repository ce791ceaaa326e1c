//! Keep a fixed set of URLs warm in the durable cache.

use crate::client::{FetchOptions, SecClient};
use chrono::Utc;
use futures::future::join_all;
use secq_cache::CacheKey;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Age after which a durable entry is fetched again.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(6 * 60 * 60);

/// Spacing of passes started by [`Prefetcher::spawn`].
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Outcome of one prefetch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// URLs whose durable entry was young enough
    pub fresh: usize,
    /// URLs fetched and stored
    pub refreshed: usize,
    /// URLs that were invalid, errored or returned a non-2xx status
    pub failed: usize,
}

/// Re-fetches URLs whose durable entry is missing or older than `max_age`.
#[derive(Debug, Clone)]
pub struct Prefetcher {
    client: SecClient,
    urls: Vec<String>,
    max_age: Duration,
    interval: Duration,
}

impl Prefetcher {
    /// Prefetcher for `urls` using the defaults.
    pub fn new<I, S>(client: SecClient, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client,
            urls: urls.into_iter().map(Into::into).collect(),
            max_age: DEFAULT_MAX_AGE,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Set the refresh age.
    pub const fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set the spacing between passes. Clamped to at least one second.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_secs(1));
        self
    }

    /// The URLs kept warm.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Check every URL once and fetch the stale ones.
    pub async fn run_once(&self) -> PrefetchReport {
        let now = Utc::now();
        let mut report = PrefetchReport::default();
        let mut stale = Vec::new();

        for url in &self.urls {
            let key = match CacheKey::parse(url) {
                Ok(key) => key,
                Err(e) => {
                    warn!(%url, error = %e, "skipping invalid prefetch url");
                    report.failed += 1;
                    continue;
                }
            };
            match self.client.cache().get_durable(&key).await {
                Some(entry) if entry.is_fresh(self.max_age, now) => report.fresh += 1,
                _ => stale.push(url.as_str()),
            }
        }

        debug!(stale = stale.len(), fresh = report.fresh, "prefetching");
        let options = FetchOptions::new().force(true);
        let results = join_all(stale.iter().map(|url| self.client.fetch(url, options))).await;
        for (url, result) in stale.iter().zip(results) {
            match result {
                Ok(response) if response.ok() => report.refreshed += 1,
                Ok(response) => {
                    warn!(%url, status = response.status(), "prefetch returned error status");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(%url, error = %e, "prefetch failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            fresh = report.fresh,
            refreshed = report.refreshed,
            failed = report.failed,
            "prefetch pass complete"
        );
        report
    }

    /// Run a pass immediately and then once per interval, until the handle
    /// is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTransport, reply};
    use secq_cache::{CacheStore, MemoryStore};
    use std::sync::Arc;

    const TICKERS: &str = "https://www.sec.gov/files/company_tickers.json";
    const BERKSHIRE: &str = "https://data.sec.gov/submissions/CIK0001067983.json";

    fn client(transport: &Arc<ScriptedTransport>) -> SecClient {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        SecClient::builder()
            .transport(transport.clone())
            .cache_store(store)
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_refreshes_missing_then_skips_fresh() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(TICKERS, reply(200, "{}"));
        transport.script(BERKSHIRE, reply(200, "{}"));
        let client = client(&transport);
        let prefetcher = Prefetcher::new(client.clone(), [TICKERS, BERKSHIRE]);

        let first = prefetcher.run_once().await;
        assert_eq!(
            first,
            PrefetchReport {
                fresh: 0,
                refreshed: 2,
                failed: 0
            }
        );
        client.flush().await;

        let second = prefetcher.run_once().await;
        assert_eq!(second.fresh, 2);
        assert_eq!(second.refreshed, 0);
        assert_eq!(transport.total_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_counted() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(TICKERS, reply(200, "{}"));
        let client = client(&transport);
        let missing = "https://www.sec.gov/files/missing.json";

        let report = Prefetcher::new(client, [TICKERS, missing, "::not a url"])
            .run_once()
            .await;
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(transport.calls(missing), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_prefetcher_runs_each_interval() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(TICKERS, reply(200, "{}"));
        let client = client(&transport);

        let handle = Prefetcher::new(client, [TICKERS])
            .max_age(Duration::ZERO)
            .interval(Duration::from_secs(60))
            .spawn();

        tokio::time::sleep(Duration::from_secs(150)).await;
        handle.abort();
        assert_eq!(transport.calls(TICKERS), 3);
    }
}
