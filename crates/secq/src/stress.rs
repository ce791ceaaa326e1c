//! Load generator for exercising the queue, retry and throttle behavior
//! against a live endpoint.

use crate::client::{FetchOptions, SecClient};
use crate::error::FetchError;
use crate::response::Response;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// What to send.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// URLs, requested round-robin
    pub urls: Vec<String>,
    /// Total number of requests
    pub requests: usize,
    /// Requests awaited at once
    pub parallelism: usize,
    /// Options for every request. Defaults to bypassing the cache and
    /// sending every request to the network, even for repeated URLs.
    pub options: FetchOptions,
}

impl StressConfig {
    /// One uncached, uncoalesced request per URL, eight at a time.
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        Self {
            requests: urls.len(),
            urls,
            parallelism: 8,
            options: FetchOptions::new().force(true).coalesce(false),
        }
    }

    /// Set the total request count.
    pub const fn requests(mut self, requests: usize) -> Self {
        self.requests = requests;
        self
    }

    /// Set how many requests are awaited at once.
    pub const fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the fetch options.
    pub const fn options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }
}

/// Latency distribution of completed requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStats {
    /// Fastest request
    pub min: Duration,
    /// Slowest request
    pub max: Duration,
    /// Arithmetic mean
    pub mean: Duration,
    /// Median (nearest rank)
    pub p50: Duration,
    /// 95th percentile (nearest rank)
    pub p95: Duration,
}

impl LatencyStats {
    /// Summarize `samples`. Returns `None` when empty.
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let percentile = |p: f64| {
            let rank = (p / 100.0 * sorted.len() as f64).ceil() as usize;
            sorted[rank.clamp(1, sorted.len()) - 1]
        };
        let total: Duration = sorted.iter().sum();

        Some(Self {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean: total / u32::try_from(sorted.len()).unwrap_or(u32::MAX),
            p50: percentile(50.0),
            p95: percentile(95.0),
        })
    }
}

/// Tally of one stress run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressReport {
    /// Requests issued
    pub requests: usize,
    /// 2xx responses
    pub successes: usize,
    /// `429` responses left after retries
    pub rate_limited: usize,
    /// Other statuses and fetch errors
    pub other_errors: usize,
    /// Latency of all completed requests
    pub latency: Option<LatencyStats>,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl StressReport {
    /// Completed requests per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.requests as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for StressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} requests in {:.2?} ({:.1} req/s)",
            self.requests,
            self.elapsed,
            self.throughput()
        )?;
        writeln!(
            f,
            "  ok: {}  rate limited: {}  errors: {}",
            self.successes, self.rate_limited, self.other_errors
        )?;
        match &self.latency {
            Some(l) => write!(
                f,
                "  latency min {:.2?}  p50 {:.2?}  p95 {:.2?}  max {:.2?}  mean {:.2?}",
                l.min, l.p50, l.p95, l.max, l.mean
            ),
            None => write!(f, "  latency n/a"),
        }
    }
}

/// Run `config` against `client`.
pub async fn run(client: &SecClient, config: &StressConfig) -> StressReport {
    run_with(client, config, |_| {}).await
}

/// Run `config` against `client`, calling `observer` after every request.
pub async fn run_with<F>(client: &SecClient, config: &StressConfig, mut observer: F) -> StressReport
where
    F: FnMut(&Result<Response, FetchError>),
{
    let started = Instant::now();
    let mut report = StressReport {
        requests: 0,
        successes: 0,
        rate_limited: 0,
        other_errors: 0,
        latency: None,
        elapsed: Duration::ZERO,
    };
    if config.urls.is_empty() {
        return report;
    }

    let options = config.options;
    let requests = (0..config.requests).map(|i| {
        let url = &config.urls[i % config.urls.len()];
        async move {
            let sent = Instant::now();
            let result = client.fetch(url, options).await;
            (sent.elapsed(), result)
        }
    });

    let mut samples = Vec::with_capacity(config.requests);
    let mut completed = stream::iter(requests).buffer_unordered(config.parallelism.max(1));
    while let Some((latency, result)) = completed.next().await {
        observer(&result);
        samples.push(latency);
        report.requests += 1;
        match &result {
            Ok(response) if response.ok() => report.successes += 1,
            Ok(response) if response.status() == crate::retry::TOO_MANY_REQUESTS => {
                report.rate_limited += 1;
            }
            _ => report.other_errors += 1,
        }
    }

    report.latency = LatencyStats::from_samples(&samples);
    report.elapsed = started.elapsed();
    info!(
        requests = report.requests,
        successes = report.successes,
        rate_limited = report.rate_limited,
        errors = report.other_errors,
        "stress run complete"
    );
    report
}
