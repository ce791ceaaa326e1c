//! Client configuration and live tunables.

use crate::retry::RetryPolicy;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering::Relaxed};
use std::time::Duration;

/// Default User-Agent. SEC asks automated clients to identify themselves
/// with a name and contact address.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "secq/",
    env!("CARGO_PKG_VERSION"),
    " (admin@example.com)"
);

/// Window during which a stale key triggers at most one background refresh.
pub const DEFAULT_REVALIDATE_DEBOUNCE: Duration = Duration::from_secs(60);

/// Rate-limit responses within the decay window needed to enter throttling.
pub const DEFAULT_RATE_LIMIT_THRESHOLD: usize = 3;

/// Scheduling and throttling knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Worker count in normal operation
    pub concurrency: usize,
    /// Pause each worker takes after a request in normal operation
    pub inter_request_delay: Duration,
    /// Worker ceiling while throttled
    pub throttled_concurrency: usize,
    /// Per-worker pause while throttled
    pub throttled_delay: Duration,
    /// How long a single `429` counts towards the threshold
    pub decay_window: Duration,
    /// How long throttling lasts once triggered
    pub throttle_window: Duration,
    /// Extra wait before every attempt while throttled
    pub pacing: Duration,
    /// `429`s within the decay window that trigger throttling
    pub threshold: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            inter_request_delay: Duration::from_millis(300),
            throttled_concurrency: 1,
            throttled_delay: Duration::from_secs(1),
            decay_window: Duration::from_secs(120),
            throttle_window: Duration::from_secs(120),
            pacing: Duration::from_millis(500),
            threshold: DEFAULT_RATE_LIMIT_THRESHOLD,
        }
    }
}

/// Everything needed to build a [`SecClient`](crate::SecClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User-Agent sent with every request
    pub user_agent: String,
    /// Overall timeout for one HTTP attempt. `None` uses the transport default.
    pub request_timeout: Option<Duration>,
    /// Retry and backoff settings
    pub retry: RetryPolicy,
    /// Initial values for the live tunables
    pub throttle: ThrottleConfig,
    /// Debounce window for stale-while-revalidate refreshes
    pub revalidate_debounce: Duration,
    /// Reject new work once this many tasks are queued. `None` is unbounded.
    pub max_queue_len: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Some(Duration::from_secs(30)),
            retry: RetryPolicy::default(),
            throttle: ThrottleConfig::default(),
            revalidate_debounce: DEFAULT_REVALIDATE_DEBOUNCE,
            max_queue_len: None,
        }
    }
}

/// Runtime-adjustable knobs shared by the scheduler and throttle controller.
///
/// Every read is fresh, so a change takes effect at the next scheduling
/// decision, including for workers that are already running. Worker counts
/// are clamped to at least one.
#[derive(Debug)]
pub struct Tunables {
    concurrency: AtomicUsize,
    inter_request_delay_ms: AtomicU64,
    throttled_concurrency: AtomicUsize,
    throttled_delay_ms: AtomicU64,
    decay_window_ms: AtomicU64,
    throttle_window_ms: AtomicU64,
    pacing_ms: AtomicU64,
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Tunables {
    /// Build tunables from their initial values.
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            concurrency: AtomicUsize::new(config.concurrency.max(1)),
            inter_request_delay_ms: AtomicU64::new(millis(config.inter_request_delay)),
            throttled_concurrency: AtomicUsize::new(config.throttled_concurrency.max(1)),
            throttled_delay_ms: AtomicU64::new(millis(config.throttled_delay)),
            decay_window_ms: AtomicU64::new(millis(config.decay_window)),
            throttle_window_ms: AtomicU64::new(millis(config.throttle_window)),
            pacing_ms: AtomicU64::new(millis(config.pacing)),
        }
    }

    /// Worker count in normal operation.
    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Relaxed)
    }

    /// Set the normal worker count.
    pub fn set_concurrency(&self, n: usize) {
        self.concurrency.store(n.max(1), Relaxed);
    }

    /// Per-worker pause in normal operation.
    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms.load(Relaxed))
    }

    /// Set the per-worker pause.
    pub fn set_inter_request_delay(&self, delay: Duration) {
        self.inter_request_delay_ms.store(millis(delay), Relaxed);
    }

    /// Worker ceiling while throttled.
    pub fn throttled_concurrency(&self) -> usize {
        self.throttled_concurrency.load(Relaxed)
    }

    /// Set the worker ceiling used while throttled.
    pub fn set_throttled_concurrency(&self, n: usize) {
        self.throttled_concurrency.store(n.max(1), Relaxed);
    }

    /// Per-worker pause while throttled.
    pub fn throttled_delay(&self) -> Duration {
        Duration::from_millis(self.throttled_delay_ms.load(Relaxed))
    }

    /// Set the per-worker pause used while throttled.
    pub fn set_throttled_delay(&self, delay: Duration) {
        self.throttled_delay_ms.store(millis(delay), Relaxed);
    }

    /// How long one `429` counts towards the threshold.
    pub fn decay_window(&self) -> Duration {
        Duration::from_millis(self.decay_window_ms.load(Relaxed))
    }

    /// Set the `429` decay window.
    pub fn set_decay_window(&self, window: Duration) {
        self.decay_window_ms.store(millis(window), Relaxed);
    }

    /// How long throttling lasts once triggered.
    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms.load(Relaxed))
    }

    /// Set the throttle window.
    pub fn set_throttle_window(&self, window: Duration) {
        self.throttle_window_ms.store(millis(window), Relaxed);
    }

    /// Extra wait before each attempt while throttled.
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms.load(Relaxed))
    }

    /// Set the extra wait applied while throttled.
    pub fn set_pacing(&self, pacing: Duration) {
        self.pacing_ms.store(millis(pacing), Relaxed);
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new(&ThrottleConfig::default())
    }
}
