//! Per-request attempt loop.
//!
//! Each task runs one [`RetryEngine::execute`]. A `429` is reported to the
//! throttle controller, then the engine sleeps for the server's `Retry-After`
//! hint (or the current backoff), capped and jittered, and tries again. After
//! the last attempt the `429` itself is returned so callers always get a
//! response. Transport failures are retried on the same schedule and become
//! [`FetchError::Network`] once attempts run out. Any other status is final.

use crate::config::millis;
use crate::error::FetchError;
use crate::throttle::ThrottleController;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use rand::Rng;
use secq_cache::CacheEntry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// HTTP status for "Too Many Requests".
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Attempt limits and backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single wait
    pub max_backoff: Duration,
    /// Largest random fraction added to a wait (0.3 adds up to 30%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            jitter: 0.3,
        }
    }
}

impl RetryPolicy {
    /// The backoff following `current`: doubled, capped.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }

    /// Wait before the next attempt with a fixed jitter draw.
    ///
    /// `unit` is a sample from `[0, 1]`; it is scaled by [`Self::jitter`].
    /// The result never exceeds [`Self::max_backoff`].
    pub fn wait_with(&self, retry_after: Option<Duration>, backoff: Duration, unit: f64) -> Duration {
        let base = retry_after.unwrap_or(backoff).min(self.max_backoff);
        let fraction = (unit.clamp(0.0, 1.0) * self.jitter).max(0.0);
        Duration::try_from_secs_f64(base.as_secs_f64() * (1.0 + fraction))
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Wait before the next attempt with a random jitter draw.
    pub fn wait(&self, retry_after: Option<Duration>, backoff: Duration) -> Duration {
        let unit = rand::thread_rng().gen_range(0.0..=1.0);
        self.wait_with(retry_after, backoff, unit)
    }
}

/// Parse a `Retry-After` value: delay seconds or an HTTP date.
///
/// Dates in the past yield a zero wait. Unparseable values yield `None`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        date.with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

/// Runs the attempt loop for one URL.
#[derive(Debug, Clone)]
pub struct RetryEngine {
    transport: Arc<dyn Transport>,
    throttle: Arc<ThrottleController>,
    policy: RetryPolicy,
}

impl RetryEngine {
    /// Create an engine.
    pub fn new(
        transport: Arc<dyn Transport>,
        throttle: Arc<ThrottleController>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            throttle,
            policy,
        }
    }

    /// The policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `url` until a final response arrives or attempts run out.
    pub async fn execute(&self, url: &Url) -> Result<CacheEntry, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff.min(self.policy.max_backoff);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if let Some(pacing) = self.throttle.pacing() {
                debug!(url = %url, pacing_ms = millis(pacing), "throttled, pacing attempt");
                tokio::time::sleep(pacing).await;
            }

            let wait = match self.transport.get(url).await {
                Ok(raw) if raw.status == TOO_MANY_REQUESTS => {
                    self.throttle.record_rate_limit();
                    let entry = CacheEntry::new(raw.status, raw.headers, raw.body);
                    if attempt >= max_attempts {
                        self.throttle.record_recovery();
                        warn!(url = %url, attempts = attempt, "still rate limited, giving up");
                        return Ok(entry);
                    }
                    let hint = entry
                        .header("retry-after")
                        .and_then(|value| parse_retry_after(value, Utc::now()));
                    let wait = self.policy.wait(hint, backoff);
                    debug!(
                        url = %url,
                        attempt,
                        wait_ms = millis(wait),
                        hinted = hint.is_some(),
                        "rate limited, backing off"
                    );
                    wait
                }
                Ok(raw) => {
                    let entry = CacheEntry::new(raw.status, raw.headers, raw.body);
                    if entry.is_success() {
                        self.throttle.record_recovery();
                    }
                    debug!(url = %url, status = entry.status, attempt, "request complete");
                    return Ok(entry);
                }
                Err(err) => {
                    if attempt >= max_attempts {
                        warn!(url = %url, attempts = attempt, error = %err, "request failed");
                        return Err(FetchError::Network {
                            url: url.to_string(),
                            attempts: attempt,
                            source: Arc::new(err),
                        });
                    }
                    let wait = self.policy.wait(None, backoff);
                    debug!(
                        url = %url,
                        attempt,
                        wait_ms = millis(wait),
                        error = %err,
                        "transport error, retrying"
                    );
                    wait
                }
            };

            tokio::time::sleep(wait).await;
            backoff = self.policy.next_backoff(backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ThrottleConfig, Tunables};
    use crate::testing::{Reply, ScriptedTransport, reply, reply_with_header};
    use crate::throttle::ThrottleMode;
    use chrono::TimeZone;
    use rstest::rstest;

    const URL: &str = "https://data.sec.gov/submissions/CIK0000320193.json";

    fn engine(transport: Arc<ScriptedTransport>, policy: RetryPolicy) -> RetryEngine {
        let tunables = Arc::new(Tunables::new(&ThrottleConfig {
            pacing: Duration::ZERO,
            ..ThrottleConfig::default()
        }));
        let throttle = Arc::new(ThrottleController::new(tunables, 3));
        RetryEngine::new(transport, throttle, policy)
    }

    fn waits(times: &[tokio::time::Instant]) -> Vec<Duration> {
        times.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    #[rstest]
    #[case("2", Some(Duration::from_secs(2)))]
    #[case(" 120 ", Some(Duration::from_secs(120)))]
    #[case("1.5", Some(Duration::from_millis(1500)))]
    #[case("Wed, 21 Oct 2015 07:28:30 GMT", Some(Duration::from_secs(30)))]
    #[case("Wed, 21 Oct 2015 07:27:00 GMT", Some(Duration::ZERO))]
    #[case("soon", None)]
    #[case("-1", None)]
    fn test_parse_retry_after(#[case] value: &str, #[case] expected: Option<Duration>) {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(parse_retry_after(value, now), expected);
    }

    #[test]
    fn test_wait_is_capped_after_jitter() {
        let policy = RetryPolicy::default();
        let cap = Duration::from_secs(60);

        assert_eq!(policy.wait_with(Some(Duration::from_secs(600)), cap, 1.0), cap);
        assert_eq!(policy.wait_with(None, Duration::from_secs(50), 1.0), cap);
        assert_eq!(
            policy.wait_with(None, Duration::from_secs(10), 1.0),
            Duration::from_secs(13)
        );
        assert_eq!(
            policy.wait_with(Some(Duration::from_secs(2)), Duration::from_secs(10), 0.0),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let policy = RetryPolicy::default();
        let mut backoff = policy.initial_backoff;
        let mut seen = vec![backoff];
        for _ in 0..10 {
            backoff = policy.next_backoff(backoff);
            seen.push(backoff);
        }
        assert_eq!(seen[1], Duration::from_secs(1));
        assert_eq!(seen[2], Duration::from_secs(2));
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(*seen.last().unwrap(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_honors_retry_after_hint() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, reply_with_header(429, "Retry-After", "2", "slow down"));
        transport.script(URL, reply(200, "{}"));

        let entry = engine(transport.clone(), RetryPolicy::default())
            .execute(&Url::parse(URL).unwrap())
            .await
            .unwrap();

        assert_eq!(entry.status, 200);
        let gaps = waits(&transport.call_times(URL));
        assert_eq!(gaps.len(), 1);
        assert!(gaps[0] >= Duration::from_secs(2));
        assert!(gaps[0] <= Duration::from_millis(2601));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_rate_limited_returns_last_response() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, reply(429, "Too Many Requests"));

        let engine = engine(transport.clone(), RetryPolicy::default());
        let entry = engine.execute(&Url::parse(URL).unwrap()).await.unwrap();

        assert_eq!(entry.status, 429);
        assert_eq!(entry.body, "Too Many Requests");
        assert_eq!(transport.calls(URL), 5);

        let gaps = waits(&transport.call_times(URL));
        assert_eq!(gaps.len(), 4);
        assert!(gaps.iter().all(|gap| *gap <= Duration::from_secs(60)));
        assert!(gaps[0] >= Duration::from_millis(500));
        // Base doubles while jitter adds at most 30%, so each gap exceeds the
        // one before it.
        assert!(gaps.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(engine.throttle.mode(), ThrottleMode::Throttled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_capped_with_large_backoff() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, reply(429, ""));
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(40),
            ..RetryPolicy::default()
        };

        engine(transport.clone(), policy)
            .execute(&Url::parse(URL).unwrap())
            .await
            .unwrap();

        let gaps = waits(&transport.call_times(URL));
        assert_eq!(gaps.len(), 3);
        assert!(gaps[0] >= Duration::from_secs(40));
        assert_eq!(gaps[1], Duration::from_secs(60));
        assert_eq!(gaps[2], Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failures_exhaust_to_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, Reply::Fail("connection reset".to_string()));

        let result = engine(transport.clone(), RetryPolicy::default())
            .execute(&Url::parse(URL).unwrap())
            .await;

        match result {
            Err(FetchError::Network { attempts, url, .. }) => {
                assert_eq!(attempts, 5);
                assert_eq!(url, URL);
            }
            other => panic!("expected network error, got {other:?}"),
        }
        assert_eq!(transport.calls(URL), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_then_success() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, Reply::Fail("timeout".to_string()));
        transport.script(URL, reply(200, "ok"));

        let entry = engine(transport.clone(), RetryPolicy::default())
            .execute(&Url::parse(URL).unwrap())
            .await
            .unwrap();
        assert_eq!(entry.body, "ok");
        assert_eq!(transport.calls(URL), 2);
    }

    #[rstest]
    #[case(404)]
    #[case(500)]
    #[case(503)]
    #[tokio::test(start_paused = true)]
    async fn test_other_statuses_are_not_retried(#[case] status: u16) {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, reply(status, "error"));

        let entry = engine(transport.clone(), RetryPolicy::default())
            .execute(&Url::parse(URL).unwrap())
            .await
            .unwrap();
        assert_eq!(entry.status, status);
        assert!(!entry.is_success());
        assert_eq!(transport.calls(URL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_counts_as_recovery() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, reply(429, ""));
        transport.script(URL, reply(429, ""));
        transport.script(URL, reply(200, "ok"));

        let engine = engine(transport.clone(), RetryPolicy::default());
        engine.execute(&Url::parse(URL).unwrap()).await.unwrap();

        assert_eq!(engine.throttle.status().recent_rate_limits, 1);
        assert_eq!(engine.throttle.mode(), ThrottleMode::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_applies_while_throttled() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, reply(200, "ok"));
        let tunables = Arc::new(Tunables::default());
        let throttle = Arc::new(ThrottleController::new(tunables, 3));
        for _ in 0..3 {
            throttle.record_rate_limit();
        }
        let engine = RetryEngine::new(transport.clone(), throttle, RetryPolicy::default());

        let started = tokio::time::Instant::now();
        engine.execute(&Url::parse(URL).unwrap()).await.unwrap();
        assert_eq!(transport.call_times(URL)[0] - started, Duration::from_millis(500));
    }
}
