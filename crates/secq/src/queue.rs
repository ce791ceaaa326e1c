//! Pending work.

use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;

/// Where a task goes in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Behind everything already queued
    #[default]
    Normal,
    /// Ahead of all normal tasks, behind earlier priority tasks
    Priority,
}

impl Placement {
    /// `Priority` when `priority` is set, `Normal` otherwise.
    pub const fn from_priority(priority: bool) -> Self {
        if priority { Self::Priority } else { Self::Normal }
    }
}

/// A deferred unit of work. Nothing runs until a worker polls it.
pub struct Task {
    label: String,
    job: BoxFuture<'static, ()>,
}

impl Task {
    /// Wrap a future. `label` is used in logs.
    pub fn new<F>(label: impl Into<String>, job: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            label: label.into(),
            job: Box::pin(job),
        }
    }

    /// Log label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Consume the task, yielding its future.
    pub fn into_job(self) -> BoxFuture<'static, ()> {
        self.job
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Two FIFO tiers; priority tasks always pop first.
#[derive(Debug, Default)]
pub struct TaskQueue {
    priority: VecDeque<Task>,
    normal: VecDeque<Task>,
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task.
    pub fn push(&mut self, task: Task, placement: Placement) {
        match placement {
            Placement::Normal => self.normal.push_back(task),
            Placement::Priority => self.priority.push_back(task),
        }
    }

    /// Take the next task.
    pub fn pop(&mut self) -> Option<Task> {
        self.priority
            .pop_front()
            .or_else(|| self.normal.pop_front())
    }

    /// Move the first normal task labelled `label` to the back of the
    /// priority tier. Returns false if no such task is waiting.
    pub fn promote(&mut self, label: &str) -> bool {
        let Some(index) = self.normal.iter().position(|task| task.label == label) else {
            return false;
        };
        match self.normal.remove(index) {
            Some(task) => {
                self.priority.push_back(task);
                true
            }
            None => false,
        }
    }

    /// Total queued tasks.
    pub fn len(&self) -> usize {
        self.priority.len() + self.normal.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.normal.is_empty()
    }

    /// Queued tasks in one tier.
    pub fn len_of(&self, placement: Placement) -> usize {
        match placement {
            Placement::Normal => self.normal.len(),
            Placement::Priority => self.priority.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(queue: &mut TaskQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.pop())
            .map(|t| t.label().to_string())
            .collect()
    }

    #[test]
    fn test_fifo_within_tier() {
        let mut queue = TaskQueue::new();
        for name in ["a", "b", "c"] {
            queue.push(Task::new(name, async {}), Placement::Normal);
        }
        assert_eq!(labels(&mut queue), ["a", "b", "c"]);
    }

    #[test]
    fn test_priority_jumps_ahead_of_normal() {
        let mut queue = TaskQueue::new();
        queue.push(Task::new("normal-1", async {}), Placement::Normal);
        queue.push(Task::new("urgent-1", async {}), Placement::Priority);
        queue.push(Task::new("normal-2", async {}), Placement::Normal);
        queue.push(Task::new("urgent-2", async {}), Placement::Priority);

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.len_of(Placement::Priority), 2);
        assert_eq!(
            labels(&mut queue),
            ["urgent-1", "urgent-2", "normal-1", "normal-2"]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_promote_moves_task_behind_priority_work() {
        let mut queue = TaskQueue::new();
        queue.push(Task::new("normal-1", async {}), Placement::Normal);
        queue.push(Task::new("normal-2", async {}), Placement::Normal);
        queue.push(Task::new("urgent-1", async {}), Placement::Priority);

        assert!(queue.promote("normal-2"));
        assert!(!queue.promote("missing"));
        assert_eq!(queue.len_of(Placement::Priority), 2);
        assert_eq!(labels(&mut queue), ["urgent-1", "normal-2", "normal-1"]);
    }

    #[test]
    fn test_placement_from_flag() {
        assert_eq!(Placement::from_priority(true), Placement::Priority);
        assert_eq!(Placement::from_priority(false), Placement::Normal);
        assert_eq!(Placement::default(), Placement::Normal);
    }
}
