//! The public entry point.

use crate::config::{ClientConfig, ThrottleConfig, Tunables};
use crate::error::{FetchError, Result};
use crate::queue::{Placement, Task};
use crate::response::{Response, ResponseSource};
use crate::retry::{RetryEngine, RetryPolicy};
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::throttle::{ThrottleController, ThrottleStatus};
use crate::transport::{HttpTransport, Transport};
use chrono::Utc;
use secq_cache::{CacheEntry, CacheKey, CacheStore, SqliteStore, TieredCache};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Default maximum age of a cached response served without a refresh.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Per-call options for [`SecClient::fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Maximum age of a cached entry that is returned as fresh
    pub cache_ttl: Duration,
    /// Skip the cache lookup and always go to the network
    pub force: bool,
    /// Queue ahead of all normal-priority work. Joining a queued exchange
    /// promotes it to the priority tier.
    pub priority: bool,
    /// Return an expired entry immediately and refresh it in the background
    pub stale_while_revalidate: bool,
    /// Share an outstanding exchange for the same URL instead of sending
    /// another request
    pub coalesce: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            force: false,
            priority: false,
            stale_while_revalidate: true,
            coalesce: true,
        }
    }
}

impl FetchOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the freshness window.
    pub const fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Bypass the cache.
    pub const fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Queue with priority.
    pub const fn priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    /// Enable or disable stale-while-revalidate.
    pub const fn stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }

    /// Join in-flight requests for the same URL, or always send a new one.
    pub const fn coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }
}

type Outcome = std::result::Result<Arc<CacheEntry>, FetchError>;

/// Callers waiting on one outstanding network exchange.
#[derive(Debug)]
struct Flight {
    id: u64,
    placement: Placement,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

#[derive(Debug)]
struct Inner {
    cache: TieredCache,
    throttle: Arc<ThrottleController>,
    scheduler: Arc<Scheduler>,
    engine: RetryEngine,
    in_flight: Mutex<HashMap<CacheKey, Flight>>,
    next_flight: AtomicU64,
    revalidations: Mutex<HashMap<CacheKey, Instant>>,
    revalidate_debounce: Duration,
}

impl Inner {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<CacheKey, Flight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn revalidations(&self) -> MutexGuard<'_, HashMap<CacheKey, Instant>> {
        self.revalidations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand `outcome` to everyone waiting on flight `id` for `key`.
    fn complete(&self, key: &CacheKey, id: u64, outcome: &Outcome) {
        let flight = {
            let mut in_flight = self.in_flight();
            match in_flight.get(key) {
                Some(flight) if flight.id == id => in_flight.remove(key),
                _ => None,
            }
        };
        let Some(flight) = flight else { return };
        if flight.waiters.len() > 1 {
            debug!(%key, waiters = flight.waiters.len(), "fanning out shared response");
        }
        for waiter in flight.waiters {
            // A caller that stopped waiting is not an error.
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Reserve the background refresh for `key` unless one ran recently.
    fn claim_revalidation(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        let debounce = self.revalidate_debounce;
        let mut pending = self.revalidations();
        if let Some(last) = pending.get(key)
            && now.saturating_duration_since(*last) < debounce
        {
            return false;
        }
        pending.retain(|_, last| now.saturating_duration_since(*last) < debounce);
        pending.insert(key.clone(), now);
        true
    }
}

/// Completes a flight with [`FetchError::Abandoned`] if its task is dropped
/// before producing a result.
struct FlightGuard {
    inner: Arc<Inner>,
    key: CacheKey,
    id: u64,
    url: Url,
    completed: bool,
}

impl FlightGuard {
    fn complete(mut self, outcome: &Outcome) {
        self.completed = true;
        self.inner.complete(&self.key, self.id, outcome);
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.completed {
            warn!(url = %self.url, "request dropped before completing");
            let abandoned = Err(FetchError::Abandoned {
                url: self.url.to_string(),
            });
            self.inner.complete(&self.key, self.id, &abandoned);
        }
    }
}

/// Rate-limit aware, cached HTTP client for SEC EDGAR.
///
/// Clones share one cache, one request queue and one throttle controller.
/// Independent clients share nothing.
#[derive(Debug, Clone)]
pub struct SecClient {
    inner: Arc<Inner>,
}

impl SecClient {
    /// Start building a client.
    pub fn builder() -> SecClientBuilder {
        SecClientBuilder::default()
    }

    /// Fetch `url`, honoring the cache according to `options`.
    ///
    /// Resolves to a [`Response`] for every completed HTTP exchange, including
    /// non-2xx statuses and rate-limit responses that outlasted every retry.
    /// Errors mean no response exists at all.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidUrl`] before any work is queued,
    /// [`FetchError::Network`] once transport failures exhaust the retries,
    /// [`FetchError::QueueFull`] when a bounded queue is at capacity.
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> Result<Response, FetchError> {
        let url = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let key = CacheKey::from_url(&url);

        if !options.force
            && let Some(entry) = self.inner.cache.get(&key).await
        {
            if entry.is_fresh(options.cache_ttl, Utc::now()) {
                debug!(%key, "serving fresh cache entry");
                return Ok(Response::new(Arc::new(entry), ResponseSource::Cache));
            }
            if options.stale_while_revalidate {
                self.revalidate(&url, key);
                return Ok(Response::new(Arc::new(entry), ResponseSource::Stale));
            }
            debug!(%key, "cache entry expired");
        }

        let placement = Placement::from_priority(options.priority);
        let waiter = if options.coalesce {
            self.start_exchange(&url, key, placement)
        } else {
            self.start_solo_exchange(&url, key, placement)?
        };
        let entry = waiter.await.unwrap_or_else(|_| {
            Err(FetchError::Abandoned {
                url: url.to_string(),
            })
        })?;
        Ok(Response::new(entry, ResponseSource::Network))
    }

    /// Queue a background refresh of a stale entry, at most once per key per
    /// debounce window.
    fn revalidate(&self, url: &Url, key: CacheKey) {
        if !self.inner.claim_revalidation(&key) {
            debug!(%key, "serving stale entry, refresh already scheduled");
            return;
        }
        debug!(%key, "serving stale entry, scheduling refresh");
        // Nobody awaits the refresh; it only updates the cache.
        drop(self.start_exchange(url, key, Placement::Normal));
    }

    /// Join the outstanding exchange for `key`, or queue a new one.
    fn start_exchange(
        &self,
        url: &Url,
        key: CacheKey,
        placement: Placement,
    ) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        let joined = {
            let mut in_flight = self.inner.in_flight();
            match in_flight.entry(key.clone()) {
                Entry::Occupied(mut flight) => {
                    let flight = flight.get_mut();
                    flight.waiters.push(tx);
                    let promote = placement == Placement::Priority
                        && flight.placement == Placement::Normal;
                    if promote {
                        flight.placement = Placement::Priority;
                    }
                    Err(promote)
                }
                Entry::Vacant(slot) => {
                    let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    slot.insert(Flight {
                        id,
                        placement,
                        waiters: vec![tx],
                    });
                    Ok(id)
                }
            }
        };
        let id = match joined {
            Ok(id) => id,
            Err(promote) => {
                debug!(%key, "joining in-flight request");
                if promote && self.inner.scheduler.promote(key.as_str()) {
                    debug!(%key, "promoted queued request to priority");
                }
                return rx;
            }
        };

        let guard = FlightGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            id,
            url: url.clone(),
            completed: false,
        };
        let task = self.exchange_task(url, key.clone(), move |outcome| guard.complete(outcome));

        if let Err(rejected) = self.inner.scheduler.enqueue(task, placement) {
            let capacity = rejected.capacity;
            self.inner
                .complete(&key, id, &Err(FetchError::QueueFull { capacity }));
        }
        rx
    }

    /// Queue an exchange that no other caller can join.
    fn start_solo_exchange(
        &self,
        url: &Url,
        key: CacheKey,
        placement: Placement,
    ) -> Result<oneshot::Receiver<Outcome>, FetchError> {
        let (tx, rx) = oneshot::channel();
        let task = self.exchange_task(url, key, move |outcome| {
            // A caller that stopped waiting is not an error.
            let _ = tx.send(outcome.clone());
        });
        self.inner.scheduler.enqueue(task, placement)?;
        Ok(rx)
    }

    /// A task that runs the retry loop for `url`, caches a successful
    /// response under `key` and passes the outcome to `finish`.
    fn exchange_task<F>(&self, url: &Url, key: CacheKey, finish: F) -> Task
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let url = url.clone();
        let label = key.as_str().to_owned();
        Task::new(label, async move {
            let outcome = inner.engine.execute(&url).await.map(Arc::new);
            if let Ok(entry) = &outcome
                && entry.is_success()
            {
                inner.cache.put(key, CacheEntry::clone(entry));
            }
            finish(&outcome);
        })
    }

    /// Empty both cache tiers.
    pub async fn clear_cache(&self) {
        self.inner.cache.clear().await;
        self.inner.revalidations().clear();
        debug!("cache cleared");
    }

    /// Live scheduling and throttling knobs.
    pub fn tunables(&self) -> &Arc<Tunables> {
        self.inner.throttle.tunables()
    }

    /// Snapshot of the throttle controller.
    pub fn throttle_status(&self) -> ThrottleStatus {
        self.inner.throttle.status()
    }

    /// Queue and worker counts.
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.inner.scheduler.stats()
    }

    /// Resolves once no request is queued or running.
    pub async fn wait_idle(&self) {
        self.inner.scheduler.wait_idle().await;
    }

    /// Wait for queued requests and pending durable cache writes.
    pub async fn flush(&self) {
        self.wait_idle().await;
        self.inner.cache.flush().await;
    }

    /// The cache behind this client.
    pub fn cache(&self) -> &TieredCache {
        &self.inner.cache
    }

    /// The retry policy in use.
    pub fn retry_policy(&self) -> &RetryPolicy {
        self.inner.engine.policy()
    }
}

/// Builder for [`SecClient`].
#[derive(Debug, Default)]
pub struct SecClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn CacheStore>>,
}

impl SecClientBuilder {
    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// User-Agent for the default HTTP transport.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Per-attempt timeout for the default HTTP transport.
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Retry and backoff settings.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Initial scheduling and throttling knobs.
    pub fn throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.config.throttle = throttle;
        self
    }

    /// Initial worker count.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.throttle.concurrency = concurrency;
        self
    }

    /// Initial per-worker pause.
    pub fn inter_request_delay(mut self, delay: Duration) -> Self {
        self.config.throttle.inter_request_delay = delay;
        self
    }

    /// Reject requests once this many are queued.
    pub fn max_queue_len(mut self, max: usize) -> Self {
        self.config.max_queue_len = Some(max);
        self
    }

    /// Minimum spacing of background refreshes for one key.
    pub fn revalidate_debounce(mut self, debounce: Duration) -> Self {
        self.config.revalidate_debounce = debounce;
        self
    }

    /// Use a custom transport instead of HTTP.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Persist responses in `store`.
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist responses in a SQLite database at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or its schema created.
    pub fn sqlite_cache(self, path: impl AsRef<Path>) -> Result<Self> {
        let store = SqliteStore::open(path)?;
        Ok(self.cache_store(Arc::new(store)))
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Fails if the default HTTP transport cannot be constructed.
    pub fn build(self) -> Result<SecClient> {
        let config = self.config;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                &config.user_agent,
                config.request_timeout,
            )?),
        };
        let cache = self
            .store
            .map_or_else(TieredCache::memory_only, TieredCache::new);

        let tunables = Arc::new(Tunables::new(&config.throttle));
        let throttle = Arc::new(ThrottleController::new(
            tunables,
            config.throttle.threshold,
        ));
        let scheduler = Scheduler::new(Arc::clone(&throttle), config.max_queue_len);
        let engine = RetryEngine::new(transport, Arc::clone(&throttle), config.retry);

        debug!(
            durable = cache.is_durable(),
            concurrency = config.throttle.concurrency,
            "client ready"
        );
        Ok(SecClient {
            inner: Arc::new(Inner {
                cache,
                throttle,
                scheduler,
                engine,
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
                revalidations: Mutex::new(HashMap::new()),
                revalidate_debounce: config.revalidate_debounce,
            }),
        })
    }
}
