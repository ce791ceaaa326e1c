//! Adaptive throttling after repeated rate-limit responses.
//!
//! Every `429` is remembered for one decay window. When the number of
//! remembered `429`s reaches the threshold, the client is throttled until
//! `now + throttle_window`: fewer workers, longer pauses between requests and
//! an extra pacing wait before each attempt. Nothing resets the state
//! explicitly; once the deadline passes every live read reports the normal
//! knobs again. More `429`s while throttled push the deadline out.
//!
//! The controller is shared by all requests of a client because SEC enforces
//! its limit per client, not per resource.

use crate::config::{Tunables, millis};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Operating mode of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleMode {
    /// Base concurrency and delay apply
    Normal,
    /// Reduced concurrency and increased delay apply
    Throttled,
}

/// Rate-limit bookkeeping.
///
/// `recent` holds the arrival time of each `429` still inside the decay
/// window, oldest first.
#[derive(Debug, Default, Clone)]
pub struct ThrottleState {
    recent: VecDeque<Instant>,
    throttled_until: Option<Instant>,
}

impl ThrottleState {
    /// Returns true while the throttle deadline lies in the future.
    pub fn is_throttled(&self, now: Instant) -> bool {
        self.throttled_until.is_some_and(|until| now < until)
    }

    /// Time left until throttling lapses.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.throttled_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    fn expire(&mut self, now: Instant, decay: Duration) {
        while let Some(&seen) = self.recent.front() {
            if now.saturating_duration_since(seen) >= decay {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Rate-limit responses still inside the decay window.
    pub fn recent_rate_limits(&mut self, now: Instant, decay: Duration) -> usize {
        self.expire(now, decay);
        self.recent.len()
    }

    /// Count a `429`. Returns true if this pushed the count to the threshold
    /// and (re)armed the throttle deadline.
    pub fn record_rate_limit(
        &mut self,
        now: Instant,
        decay: Duration,
        window: Duration,
        threshold: usize,
    ) -> bool {
        self.expire(now, decay);
        self.recent.push_back(now);
        if self.recent.len() >= threshold {
            self.throttled_until = Some(now + window);
            true
        } else {
            false
        }
    }

    /// Forget the oldest remembered `429`.
    pub fn record_recovery(&mut self, now: Instant, decay: Duration) {
        self.expire(now, decay);
        self.recent.pop_front();
    }
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleStatus {
    /// Current mode
    pub mode: ThrottleMode,
    /// `429`s inside the decay window
    pub recent_rate_limits: usize,
    /// Time left in the throttle window, if throttled
    pub remaining: Option<Duration>,
    /// Live worker ceiling
    pub concurrency: usize,
    /// Live per-worker pause
    pub inter_request_delay: Duration,
}

/// Shared throttle controller.
#[derive(Debug)]
pub struct ThrottleController {
    tunables: Arc<Tunables>,
    threshold: usize,
    state: Mutex<ThrottleState>,
}

impl ThrottleController {
    /// Create a controller reading its knobs from `tunables`.
    pub fn new(tunables: Arc<Tunables>, threshold: usize) -> Self {
        Self {
            tunables,
            threshold: threshold.max(1),
            state: Mutex::new(ThrottleState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The knobs this controller reads.
    pub fn tunables(&self) -> &Arc<Tunables> {
        &self.tunables
    }

    /// Count a rate-limit response.
    pub fn record_rate_limit(&self) {
        let now = Instant::now();
        let window = self.tunables.throttle_window();
        let mut state = self.state();
        let was_throttled = state.is_throttled(now);
        let armed =
            state.record_rate_limit(now, self.tunables.decay_window(), window, self.threshold);

        if armed && !was_throttled {
            info!(
                recent = state.recent.len(),
                window_ms = millis(window),
                concurrency = self.tunables.throttled_concurrency(),
                "rate limited repeatedly, throttling"
            );
        } else if armed {
            debug!(recent = state.recent.len(), "throttle window extended");
        } else {
            debug!(recent = state.recent.len(), "rate limit recorded");
        }
    }

    /// Signal a healthy (or terminal) response so the count can wind down.
    pub fn record_recovery(&self) {
        let now = Instant::now();
        self.state()
            .record_recovery(now, self.tunables.decay_window());
    }

    /// Returns true while throttled.
    pub fn is_throttled(&self) -> bool {
        self.state().is_throttled(Instant::now())
    }

    /// Current mode.
    pub fn mode(&self) -> ThrottleMode {
        if self.is_throttled() {
            ThrottleMode::Throttled
        } else {
            ThrottleMode::Normal
        }
    }

    /// Live worker ceiling.
    pub fn concurrency(&self) -> usize {
        let base = self.tunables.concurrency().max(1);
        if self.is_throttled() {
            base.min(self.tunables.throttled_concurrency()).max(1)
        } else {
            base
        }
    }

    /// Live per-worker pause.
    pub fn inter_request_delay(&self) -> Duration {
        let base = self.tunables.inter_request_delay();
        if self.is_throttled() {
            base.max(self.tunables.throttled_delay())
        } else {
            base
        }
    }

    /// Extra wait before an attempt, if throttled.
    pub fn pacing(&self) -> Option<Duration> {
        self.is_throttled()
            .then(|| self.tunables.pacing())
            .filter(|d| !d.is_zero())
    }

    /// Snapshot of the controller.
    pub fn status(&self) -> ThrottleStatus {
        let now = Instant::now();
        let (recent, remaining) = {
            let mut state = self.state();
            (
                state.recent_rate_limits(now, self.tunables.decay_window()),
                state.remaining(now),
            )
        };
        ThrottleStatus {
            mode: if remaining.is_some() {
                ThrottleMode::Throttled
            } else {
                ThrottleMode::Normal
            },
            recent_rate_limits: recent,
            remaining,
            concurrency: self.concurrency(),
            inter_request_delay: self.inter_request_delay(),
        }
    }
}
