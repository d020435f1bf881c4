//! Uniform view over a governed pool
//!
//! Governance components never touch the pool primitive directly; they go
//! through [`PoolAdapter`] for introspection and live mutation.

use std::time::Duration;

use crate::executor::{ExecutorError, QueueKind, Task, ThreadPool};
use crate::stats::PoolStats;

/// Introspection and live-mutation contract of a governed pool
///
/// Stats reads are consistent as of the call; they are not transactional
/// with respect to concurrent submissions.
pub trait PoolAdapter: Send + Sync {
    /// Pool name, the key used by every other component
    fn name(&self) -> &str;

    /// Point-in-time snapshot, no side effects
    fn stats(&self) -> PoolStats;

    /// Hand a task to the pool; returns as soon as it is placed or rejected
    fn submit(&self, task: Task) -> Result<(), ExecutorError>;

    /// Every core worker exists and the queue is full
    fn is_saturated(&self) -> bool {
        let stats = self.stats();
        stats.pool_size >= stats.core_size && stats.queue_remaining_capacity == 0
    }

    fn core_size(&self) -> usize;

    fn max_size(&self) -> usize;

    fn queue_capacity(&self) -> usize;

    fn keep_alive(&self) -> Duration;

    fn set_core_size(&self, core_size: usize) -> Result<(), ExecutorError>;

    fn set_max_size(&self, max_size: usize) -> Result<(), ExecutorError>;

    fn set_keep_alive(&self, keep_alive: Duration) -> Result<(), ExecutorError>;

    fn set_allow_core_timeout(&self, allow: bool) -> Result<(), ExecutorError>;

    /// Whether `set_queue_capacity` can succeed with a different capacity
    fn supports_queue_resize(&self) -> bool;

    fn set_queue_capacity(&self, capacity: usize) -> Result<(), ExecutorError>;

    /// Remove the oldest queued task
    fn poll_oldest(&self) -> Option<Task>;

    /// Count one rejection
    fn record_rejection(&self);

    fn is_shutdown(&self) -> bool;

    /// Stop intake; queued work still drains
    fn shutdown(&self);

    /// Wait for every worker to exit after shutdown; false on timeout
    fn await_termination(&self, timeout: Duration) -> bool;
}

impl PoolAdapter for ThreadPool {
    fn name(&self) -> &str {
        ThreadPool::name(self)
    }

    fn stats(&self) -> PoolStats {
        self.snapshot()
    }

    fn submit(&self, task: Task) -> Result<(), ExecutorError> {
        self.execute(task)
    }

    fn core_size(&self) -> usize {
        ThreadPool::core_size(self)
    }

    fn max_size(&self) -> usize {
        ThreadPool::max_size(self)
    }

    fn queue_capacity(&self) -> usize {
        ThreadPool::queue_capacity(self)
    }

    fn keep_alive(&self) -> Duration {
        ThreadPool::keep_alive(self)
    }

    fn set_core_size(&self, core_size: usize) -> Result<(), ExecutorError> {
        self.set_core_pool_size(core_size)
    }

    fn set_max_size(&self, max_size: usize) -> Result<(), ExecutorError> {
        self.set_maximum_pool_size(max_size)
    }

    fn set_keep_alive(&self, keep_alive: Duration) -> Result<(), ExecutorError> {
        ThreadPool::set_keep_alive(self, keep_alive)
    }

    fn set_allow_core_timeout(&self, allow: bool) -> Result<(), ExecutorError> {
        ThreadPool::set_allow_core_timeout(self, allow)
    }

    fn supports_queue_resize(&self) -> bool {
        self.queue_kind() == QueueKind::Resizable
    }

    fn set_queue_capacity(&self, capacity: usize) -> Result<(), ExecutorError> {
        ThreadPool::set_queue_capacity(self, capacity)
    }

    fn poll_oldest(&self) -> Option<Task> {
        ThreadPool::poll_oldest(self)
    }

    fn record_rejection(&self) {
        ThreadPool::record_rejection(self)
    }

    fn is_shutdown(&self) -> bool {
        ThreadPool::is_shutdown(self)
    }

    fn shutdown(&self) {
        ThreadPool::shutdown(self)
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        ThreadPool::await_termination(self, timeout)
    }
}
