//! Worker-pool primitive
//!
//! This module provides:
//! - [`ThreadPool`] - OS-thread pool with core/max sizing, keep-alive and a bounded queue
//! - [`TaskInterceptor`] - Hooks for queue entry/exit and execution
//! - [`RejectionHandler`] - Decision point for tasks the pool cannot take
//!
//! # Architecture
//!
//! ```text
//! submit ──► pool_size < core ──► new worker
//!              │ no
//!              ▼
//!            queue.offer ──► queued (on_enqueue)
//!              │ full
//!              ▼
//!            pool_size < max ──► new worker
//!              │ no
//!              ▼
//!            RejectionHandler (caller thread, no lock held)
//! ```
//!
//! Workers pull from the queue (on_dequeue, under the pool lock) and run
//! each task between `before_execute` and `after_execute`.

mod pool;
mod queue;
mod task;

pub use pool::{
    AbortHandler, ExecutorError, NoopInterceptor, RejectionHandler, TaskInterceptor, ThreadPool,
    ThreadPoolConfig,
};
pub use queue::QueueKind;
pub use task::{Task, TaskId, TaskMeta, TaskOutcome};
pub(crate) use task::panic_message;
