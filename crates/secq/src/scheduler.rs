//! Worker pool draining the task queue.
//!
//! Enqueueing runs a scheduling pass that starts workers up to
//! `min(live concurrency, running + queued)`. Each worker pops a task, runs
//! it, sleeps the live inter-request delay and repeats. A worker exits when
//! the queue is empty or when more workers are running than the live ceiling
//! allows, so a throttle that lowers concurrency takes effect as soon as
//! running tasks finish. Worker accounting happens under the queue lock.

use crate::error::FetchError;
use crate::queue::{Placement, Task, TaskQueue};
use crate::throttle::ThrottleController;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

/// A task the scheduler refused because the queue is at capacity.
#[derive(Debug)]
pub struct Rejected {
    /// The task, handed back unrun
    pub task: Task,
    /// Configured maximum queue length
    pub capacity: usize,
}

impl From<Rejected> for FetchError {
    fn from(rejected: Rejected) -> Self {
        Self::QueueFull {
            capacity: rejected.capacity,
        }
    }
}

/// Queue and worker counts at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    /// Tasks waiting in the priority tier
    pub queued_priority: usize,
    /// Tasks waiting in the normal tier
    pub queued_normal: usize,
    /// Running workers
    pub workers: usize,
}

#[derive(Debug, Default)]
struct Pool {
    queue: TaskQueue,
    workers: usize,
}

/// Bounded-concurrency executor for [`Task`]s.
#[derive(Debug)]
pub struct Scheduler {
    throttle: Arc<ThrottleController>,
    pool: Mutex<Pool>,
    idle: watch::Sender<bool>,
    max_queue_len: Option<usize>,
}

impl Scheduler {
    /// Create a scheduler whose concurrency and delay come from `throttle`.
    pub fn new(throttle: Arc<ThrottleController>, max_queue_len: Option<usize>) -> Arc<Self> {
        let (idle, _) = watch::channel(true);
        Arc::new(Self {
            throttle,
            pool: Mutex::new(Pool::default()),
            idle,
            max_queue_len,
        })
    }

    fn pool(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a task and make sure enough workers are running.
    ///
    /// A full bounded queue hands the task back unrun. Must be called from
    /// within a tokio runtime.
    pub fn enqueue(self: &Arc<Self>, task: Task, placement: Placement) -> Result<(), Rejected> {
        let spawn = {
            let mut pool = self.pool();
            if let Some(capacity) = self.max_queue_len
                && pool.queue.len() >= capacity
            {
                warn!(task = task.label(), capacity, "request queue full, rejecting");
                return Err(Rejected { task, capacity });
            }
            debug!(
                task = task.label(),
                ?placement,
                queued = pool.queue.len() + 1,
                "task queued"
            );
            pool.queue.push(task, placement);
            self.claim_workers(&mut pool)
        };
        self.spawn_workers(spawn);
        Ok(())
    }

    /// Move a queued normal task labelled `label` into the priority tier.
    /// Returns false if it is not waiting (already running or unknown).
    pub fn promote(&self, label: &str) -> bool {
        self.pool().queue.promote(label)
    }

    /// Reserve worker slots for queued work under the live ceiling.
    fn claim_workers(&self, pool: &mut Pool) -> usize {
        let ceiling = self.throttle.concurrency();
        let wanted = ceiling.min(pool.workers + pool.queue.len());
        let claimed = wanted.saturating_sub(pool.workers);
        pool.workers += claimed;
        if pool.workers > 0 {
            self.idle.send_replace(false);
        }
        claimed
    }

    fn spawn_workers(self: &Arc<Self>, count: usize) {
        for _ in 0..count {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move { scheduler.run_worker().await });
        }
    }

    fn retire(&self, pool: &mut Pool) {
        pool.workers -= 1;
        if pool.workers == 0 && pool.queue.is_empty() {
            self.idle.send_replace(true);
        }
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let task = {
                let mut pool = self.pool();
                if pool.workers > self.throttle.concurrency() {
                    self.retire(&mut pool);
                    debug!(workers = pool.workers, "worker above ceiling, retiring");
                    return;
                }
                match pool.queue.pop() {
                    Some(task) => task,
                    None => {
                        self.retire(&mut pool);
                        return;
                    }
                }
            };

            let label = task.label().to_string();
            if AssertUnwindSafe(task.into_job())
                .catch_unwind()
                .await
                .is_err()
            {
                warn!(task = %label, "task panicked");
            }

            let delay = self.throttle.inter_request_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            // The ceiling may have risen while this worker was busy.
            let extra = {
                let mut pool = self.pool();
                self.claim_workers(&mut pool)
            };
            self.spawn_workers(extra);
        }
    }

    /// Resolves once the queue is empty and every worker has exited.
    pub async fn wait_idle(&self) {
        let mut idle = self.idle.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = idle.wait_for(|idle| *idle).await;
    }

    /// Returns true if nothing is queued or running.
    pub fn is_idle(&self) -> bool {
        *self.idle.borrow()
    }

    /// Current queue and worker counts.
    pub fn stats(&self) -> SchedulerStats {
        let pool = self.pool();
        SchedulerStats {
            queued_priority: pool.queue.len_of(Placement::Priority),
            queued_normal: pool.queue.len_of(Placement::Normal),
            workers: pool.workers,
        }
    }
}
