//! Thread pool with live-tunable sizing
//!
//! Classic core/max semantics: a submission starts a new worker while the
//! pool is below core size, otherwise it is queued, otherwise a worker is
//! started while below max size, otherwise the installed
//! [`RejectionHandler`] decides. Workers above core size (or every worker,
//! with core timeout enabled) exit after idling for the keep-alive.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::queue::{QueueKind, TaskQueue};
use super::task::{panic_message, Task, TaskId, TaskMeta, TaskOutcome};
use crate::stats::PoolStats;

/// Primitive-level errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// The rejection handler refused the task
    #[error("task {task_id} rejected by pool {pool}")]
    Rejected { pool: String, task_id: TaskId },

    /// The pool no longer accepts tasks
    #[error("pool {0} is shut down")]
    Shutdown(String),

    /// A size setter would break `1 <= max` or `core <= max`
    #[error("invalid pool size: {0}")]
    InvalidSize(String),

    /// The queue is fixed-capacity
    #[error("queue of pool {pool} cannot be resized from {current} to {requested}")]
    UnsupportedResize {
        pool: String,
        current: usize,
        requested: usize,
    },
}

/// Observer of task movement through a pool
///
/// `on_enqueue` and `on_dequeue` are called while the pool lock is held, so
/// implementations must not block or call back into the pool.
pub trait TaskInterceptor: Send + Sync {
    /// The task was appended to the queue
    fn on_enqueue(&self, _task: &TaskMeta) {}

    /// The task is about to leave the queue (start, discard or drain)
    fn on_dequeue(&self, _task: &TaskMeta) {}

    /// Runs on the worker thread right before the body
    fn before_execute(&self, _task: &TaskMeta) {}

    /// Runs on the worker thread right after the body
    fn after_execute(&self, _task: &TaskMeta, _outcome: &TaskOutcome) {}
}

/// Interceptor that does nothing
pub struct NoopInterceptor;

impl TaskInterceptor for NoopInterceptor {}

/// Decides what happens to a task the pool cannot take
///
/// Invoked on the submitting thread, without the pool lock held.
pub trait RejectionHandler: Send + Sync {
    fn rejected(&self, task: Task, pool: &ThreadPool) -> Result<(), ExecutorError>;
}

/// Handler that refuses every task
pub struct AbortHandler;

impl RejectionHandler for AbortHandler {
    fn rejected(&self, task: Task, pool: &ThreadPool) -> Result<(), ExecutorError> {
        Err(ExecutorError::Rejected {
            pool: pool.name().to_string(),
            task_id: task.id(),
        })
    }
}

/// Thread pool construction options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPoolConfig {
    /// Pool name, also used as the worker thread name prefix
    pub name: String,
    pub core_size: usize,
    pub max_size: usize,
    pub queue_capacity: usize,
    pub queue_kind: QueueKind,
    #[serde(with = "crate::config::duration_millis")]
    pub keep_alive: Duration,
    pub allow_core_timeout: bool,
}

impl ThreadPoolConfig {
    pub fn new(name: impl Into<String>, core_size: usize, max_size: usize) -> Self {
        Self {
            name: name.into(),
            core_size,
            max_size,
            queue_capacity: 1024,
            queue_kind: QueueKind::Resizable,
            keep_alive: Duration::from_secs(60),
            allow_core_timeout: false,
        }
    }

    pub fn with_queue(mut self, kind: QueueKind, capacity: usize) -> Self {
        self.queue_kind = kind;
        self.queue_capacity = capacity;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_allow_core_timeout(mut self, allow: bool) -> Self {
        self.allow_core_timeout = allow;
        self
    }
}

struct PoolState {
    queue: TaskQueue,
    core_size: usize,
    max_size: usize,
    keep_alive: Duration,
    allow_core_timeout: bool,
    pool_size: usize,
    largest_pool_size: usize,
    shutdown: bool,
}

struct Shared {
    name: String,
    state: Mutex<PoolState>,
    /// Signalled when work arrives, sizing changes or shutdown starts
    available: Condvar,
    /// Signalled when the last worker exits after shutdown
    terminated: Condvar,
    active: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
    worker_seq: AtomicU64,
    interceptor: RwLock<Arc<dyn TaskInterceptor>>,
    handler: RwLock<Arc<dyn RejectionHandler>>,
}

impl Shared {
    fn interceptor(&self) -> Arc<dyn TaskInterceptor> {
        self.interceptor.read().clone()
    }
}

/// Worker-thread pool with a bounded queue
///
/// # Example
///
/// ```
/// use poolwarden_governor::executor::{ThreadPool, ThreadPoolConfig, QueueKind};
/// use poolwarden_governor::{Task, TaskContext};
///
/// let pool = ThreadPool::new(
///     ThreadPoolConfig::new("io-pool", 2, 4).with_queue(QueueKind::Resizable, 10),
/// )
/// .unwrap();
/// pool.execute(Task::new(TaskContext::new(), || println!("hello"))).unwrap();
/// pool.shutdown();
/// ```
pub struct ThreadPool {
    shared: Arc<Shared>,
}

impl ThreadPool {
    /// Create a pool; no threads are started until work arrives
    pub fn new(config: ThreadPoolConfig) -> Result<Self, ExecutorError> {
        if config.max_size == 0 || config.core_size > config.max_size {
            return Err(ExecutorError::InvalidSize(format!(
                "core_size {} / max_size {}",
                config.core_size, config.max_size
            )));
        }

        let state = PoolState {
            queue: TaskQueue::new(config.queue_kind, config.queue_capacity),
            core_size: config.core_size,
            max_size: config.max_size,
            keep_alive: config.keep_alive,
            allow_core_timeout: config.allow_core_timeout,
            pool_size: 0,
            largest_pool_size: 0,
            shutdown: false,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                name: config.name,
                state: Mutex::new(state),
                available: Condvar::new(),
                terminated: Condvar::new(),
                active: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                worker_seq: AtomicU64::new(0),
                interceptor: RwLock::new(Arc::new(NoopInterceptor)),
                handler: RwLock::new(Arc::new(AbortHandler)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Install the task interceptor
    pub fn set_interceptor(&self, interceptor: Arc<dyn TaskInterceptor>) {
        *self.shared.interceptor.write() = interceptor;
    }

    /// Install the rejection handler
    pub fn set_rejection_handler(&self, handler: Arc<dyn RejectionHandler>) {
        *self.shared.handler.write() = handler;
    }

    /// Submit a task
    pub fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        let refused = {
            let mut state = self.shared.state.lock();
            self.try_accept(&mut state, task)
        };
        match refused {
            None => Ok(()),
            Some(task) => self.reject(task),
        }
    }

    /// Place the task or hand it back for rejection
    fn try_accept(&self, state: &mut MutexGuard<'_, PoolState>, task: Task) -> Option<Task> {
        if state.shutdown {
            return Some(task);
        }

        if state.pool_size < state.core_size {
            return add_worker(&self.shared, state, Some(task)).err().flatten();
        }

        match state.queue.offer(task) {
            Ok(()) => {
                if let Some(queued) = state.queue.back() {
                    let interceptor = self.shared.interceptor();
                    guarded("on_enqueue", || interceptor.on_enqueue(queued.meta()));
                }
                if state.pool_size == 0 {
                    // core size 0: make sure something drains the queue
                    let _ = add_worker(&self.shared, state, None);
                } else {
                    self.shared.available.notify_one();
                }
                None
            }
            Err(task) if state.pool_size < state.max_size => {
                add_worker(&self.shared, state, Some(task)).err().flatten()
            }
            Err(task) => Some(task),
        }
    }

    fn reject(&self, task: Task) -> Result<(), ExecutorError> {
        let handler = self.shared.handler.read().clone();
        handler.rejected(task, self)
    }

    /// Remove and return the oldest queued task
    pub fn poll_oldest(&self) -> Option<Task> {
        let mut state = self.shared.state.lock();
        let interceptor = self.shared.interceptor();
        if let Some(front) = state.queue.front() {
            guarded("on_dequeue", || interceptor.on_dequeue(front.meta()));
        }
        state.queue.poll()
    }

    /// Ids of the queued tasks, head first
    pub fn queued_task_ids(&self) -> Vec<TaskId> {
        self.shared.state.lock().queue.iter().map(Task::id).collect()
    }

    /// Count a rejection against this pool
    pub fn record_rejection(&self) {
        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Live tuning
    // ------------------------------------------------------------------

    /// Change the core size; must not exceed the current max size
    pub fn set_core_pool_size(&self, core_size: usize) -> Result<(), ExecutorError> {
        let mut state = self.shared.state.lock();
        if core_size > state.max_size {
            return Err(ExecutorError::InvalidSize(format!(
                "core_size {} exceeds max_size {}",
                core_size, state.max_size
            )));
        }

        let previous = state.core_size;
        state.core_size = core_size;

        if state.pool_size > core_size {
            // idle workers above the new core size start timing out
            self.shared.available.notify_all();
        } else if core_size > previous && !state.shutdown {
            // start enough workers to cover what is already queued
            let mut wanted = (core_size - previous).min(state.queue.len());
            while wanted > 0 && state.pool_size < state.core_size {
                if add_worker(&self.shared, &mut state, None).is_err() {
                    break;
                }
                wanted -= 1;
            }
        }

        debug!(pool = %self.shared.name, previous, core_size, "core size updated");
        Ok(())
    }

    /// Change the max size; must be at least 1 and at least the current core size
    pub fn set_maximum_pool_size(&self, max_size: usize) -> Result<(), ExecutorError> {
        let mut state = self.shared.state.lock();
        if max_size == 0 || max_size < state.core_size {
            return Err(ExecutorError::InvalidSize(format!(
                "max_size {} below core_size {} or zero",
                max_size, state.core_size
            )));
        }

        let previous = state.max_size;
        state.max_size = max_size;
        if state.pool_size > max_size {
            self.shared.available.notify_all();
        }

        debug!(pool = %self.shared.name, previous, max_size, "max size updated");
        Ok(())
    }

    /// Change the idle timeout of non-core workers
    pub fn set_keep_alive(&self, keep_alive: Duration) -> Result<(), ExecutorError> {
        let mut state = self.shared.state.lock();
        if keep_alive.is_zero() && state.allow_core_timeout {
            return Err(ExecutorError::InvalidSize(
                "core threads must have a non-zero keep-alive".into(),
            ));
        }
        let shrinking = keep_alive < state.keep_alive;
        state.keep_alive = keep_alive;
        if shrinking {
            self.shared.available.notify_all();
        }
        Ok(())
    }

    /// Let core workers time out after the keep-alive
    pub fn set_allow_core_timeout(&self, allow: bool) -> Result<(), ExecutorError> {
        let mut state = self.shared.state.lock();
        if allow && state.keep_alive.is_zero() {
            return Err(ExecutorError::InvalidSize(
                "core threads must have a non-zero keep-alive".into(),
            ));
        }
        state.allow_core_timeout = allow;
        if allow {
            self.shared.available.notify_all();
        }
        Ok(())
    }

    /// Change the queue capacity in place
    pub fn set_queue_capacity(&self, capacity: usize) -> Result<(), ExecutorError> {
        let mut state = self.shared.state.lock();
        state
            .queue
            .set_capacity(capacity)
            .map_err(|current| ExecutorError::UnsupportedResize {
                pool: self.shared.name.clone(),
                current,
                requested: capacity,
            })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stop accepting tasks; queued tasks still run
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        self.shared.available.notify_all();
        if state.pool_size == 0 {
            self.shared.terminated.notify_all();
        }
        info!(pool = %self.shared.name, queued = state.queue.len(), "pool shutting down");
    }

    /// Stop accepting tasks and hand back everything still queued
    pub fn shutdown_now(&self) -> Vec<Task> {
        let mut state = self.shared.state.lock();
        state.shutdown = true;

        let interceptor = self.shared.interceptor();
        let mut drained = Vec::with_capacity(state.queue.len());
        while let Some(front) = state.queue.front() {
            guarded("on_dequeue", || interceptor.on_dequeue(front.meta()));
            if let Some(task) = state.queue.poll() {
                drained.push(task);
            }
        }

        self.shared.available.notify_all();
        if state.pool_size == 0 {
            self.shared.terminated.notify_all();
        }
        drained
    }

    /// Block until every worker has exited after shutdown, or the timeout passes
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if state.shutdown && state.pool_size == 0 {
                return true;
            }
            if self
                .shared
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.shutdown && state.pool_size == 0;
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn core_size(&self) -> usize {
        self.shared.state.lock().core_size
    }

    pub fn max_size(&self) -> usize {
        self.shared.state.lock().max_size
    }

    pub fn keep_alive(&self) -> Duration {
        self.shared.state.lock().keep_alive
    }

    pub fn queue_kind(&self) -> QueueKind {
        self.shared.state.lock().queue.kind()
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.state.lock().queue.capacity()
    }

    pub fn pool_size(&self) -> usize {
        self.shared.state.lock().pool_size
    }

    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    /// Snapshot every counter under a single lock acquisition
    pub fn snapshot(&self) -> PoolStats {
        let state = self.shared.state.lock();
        let active = self.shared.active.load(Ordering::Relaxed);
        let completed = self.shared.completed.load(Ordering::Relaxed);
        let terminated = state.shutdown && state.pool_size == 0;

        PoolStats {
            pool_name: self.shared.name.clone(),
            pool_size: state.pool_size,
            active_count: active,
            core_size: state.core_size,
            max_size: state.max_size,
            largest_pool_size: state.largest_pool_size,
            task_count: completed + active as u64 + state.queue.len() as u64,
            completed_task_count: completed,
            queue_capacity: state.queue.capacity(),
            queue_size: state.queue.len(),
            queue_remaining_capacity: state.queue.remaining(),
            reject_count: self.shared.rejected.load(Ordering::Relaxed),
            is_shutdown: state.shutdown,
            is_terminated: terminated,
            is_terminating: state.shutdown && !terminated,
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run an interceptor callback without letting a panic escape into the pool
fn guarded(callback: &'static str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        warn!(
            callback,
            panic = %panic_message(payload.as_ref()),
            "task interceptor panicked"
        );
    }
}

/// Start a worker, optionally seeded with its first task
///
/// On failure the seed task is handed back.
fn add_worker(
    shared: &Arc<Shared>,
    state: &mut PoolState,
    first: Option<Task>,
) -> Result<(), Option<Task>> {
    state.pool_size += 1;
    state.largest_pool_size = state.largest_pool_size.max(state.pool_size);

    let seeded = first.is_some();
    if seeded {
        shared.active.fetch_add(1, Ordering::Relaxed);
    }

    let seq = shared.worker_seq.fetch_add(1, Ordering::Relaxed);
    let handoff = Arc::new(Mutex::new(first));
    let worker_shared = Arc::clone(shared);
    let worker_handoff = Arc::clone(&handoff);

    let spawned = thread::Builder::new()
        .name(format!("{}-{}", shared.name, seq))
        .spawn(move || {
            let first = worker_handoff.lock().take();
            run_worker(worker_shared, first);
        });

    match spawned {
        Ok(_) => Ok(()),
        Err(e) => {
            state.pool_size -= 1;
            if seeded {
                shared.active.fetch_sub(1, Ordering::Relaxed);
            }
            error!(pool = %shared.name, error = %e, "failed to spawn worker thread");
            let seed = handoff.lock().take();
            Err(seed)
        }
    }
}

fn run_worker(shared: Arc<Shared>, first: Option<Task>) {
    let mut next = first;

    loop {
        let task = match next.take() {
            Some(task) => task,
            None => match next_task(&shared) {
                Some(task) => task,
                None => break,
            },
        };

        let interceptor = shared.interceptor();
        guarded("before_execute", || interceptor.before_execute(task.meta()));
        let (meta, outcome) = task.run();
        guarded("after_execute", || interceptor.after_execute(&meta, &outcome));

        shared.completed.fetch_add(1, Ordering::Relaxed);
        shared.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Block for the next queued task; `None` means this worker must exit
///
/// The pool size is decremented here, under the lock, whenever the worker
/// decides to exit.
fn next_task(shared: &Shared) -> Option<Task> {
    let mut state = shared.state.lock();
    let mut timed_out = false;

    loop {
        if state.shutdown && state.queue.is_empty() {
            return exit_worker(shared, &mut state);
        }

        let timed = state.allow_core_timeout || state.pool_size > state.core_size;
        if (state.pool_size > state.max_size || (timed && timed_out))
            && (state.pool_size > 1 || state.queue.is_empty())
        {
            return exit_worker(shared, &mut state);
        }

        if let Some(front) = state.queue.front() {
            let interceptor = shared.interceptor();
            guarded("on_dequeue", || interceptor.on_dequeue(front.meta()));
            let task = state.queue.poll();
            shared.active.fetch_add(1, Ordering::Relaxed);
            return task;
        }

        if timed {
            let keep_alive = state.keep_alive;
            timed_out = shared
                .available
                .wait_for(&mut state, keep_alive)
                .timed_out();
        } else {
            shared.available.wait(&mut state);
        }
    }
}

fn exit_worker(shared: &Shared, state: &mut PoolState) -> Option<Task> {
    state.pool_size -= 1;
    if state.shutdown && state.pool_size == 0 {
        shared.terminated.notify_all();
    }
    None
}
