//! Governed pool handle and its task interceptor

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::adapter::PoolAdapter;
use crate::aware::HookDispatcher;
use crate::config::PoolParams;
use crate::context::TaskContext;
use crate::error::GovernorError;
use crate::executor::{Task, TaskId, TaskInterceptor, TaskMeta, TaskOutcome};
use crate::stats::PoolStats;
use crate::timeout::QueueTimeoutWatcher;

/// Atomically swappable parameter snapshot
///
/// Readers clone the inner `Arc` and never observe a half-applied update.
#[derive(Debug)]
pub struct ParamsSnapshot {
    current: RwLock<Arc<PoolParams>>,
}

impl ParamsSnapshot {
    pub fn new(params: PoolParams) -> Self {
        Self {
            current: RwLock::new(Arc::new(params)),
        }
    }

    pub fn load(&self) -> Arc<PoolParams> {
        self.current.read().clone()
    }

    pub(crate) fn store(&self, params: PoolParams) {
        *self.current.write() = Arc::new(params);
    }
}

/// A registered pool
///
/// Parameters change only through
/// [`ReconfigurationController`](crate::reconfig::ReconfigurationController).
pub struct PoolHandle {
    name: String,
    adapter: Arc<dyn PoolAdapter>,
    params: Arc<ParamsSnapshot>,
}

impl PoolHandle {
    pub fn new(
        name: impl Into<String>,
        adapter: Arc<dyn PoolAdapter>,
        params: Arc<ParamsSnapshot>,
    ) -> Self {
        Self {
            name: name.into(),
            adapter,
            params,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adapter(&self) -> &Arc<dyn PoolAdapter> {
        &self.adapter
    }

    /// Parameters as last applied
    pub fn params(&self) -> Arc<PoolParams> {
        self.params.load()
    }

    pub(crate) fn params_cell(&self) -> &Arc<ParamsSnapshot> {
        &self.params
    }

    pub fn stats(&self) -> PoolStats {
        self.adapter.stats()
    }

    /// Submit a closure; returns once it is placed, run by the caller, or refused
    pub fn submit<F>(&self, context: TaskContext, f: F) -> Result<TaskId, GovernorError>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Task::new(context, f);
        let id = task.id();
        self.adapter.submit(task)?;
        Ok(id)
    }
}

/// Connects a pool's task movement to queue-timeout watching and hooks
pub(crate) struct GovernedInterceptor {
    pool_name: String,
    pool: Weak<dyn PoolAdapter>,
    params: Arc<ParamsSnapshot>,
    watcher: Arc<QueueTimeoutWatcher>,
    hooks: HookDispatcher,
}

impl GovernedInterceptor {
    pub(crate) fn new(
        pool: &Arc<dyn PoolAdapter>,
        params: Arc<ParamsSnapshot>,
        watcher: Arc<QueueTimeoutWatcher>,
        hooks: HookDispatcher,
    ) -> Self {
        Self {
            pool_name: pool.name().to_string(),
            pool: Arc::downgrade(pool),
            params,
            watcher,
            hooks,
        }
    }
}

impl TaskInterceptor for GovernedInterceptor {
    fn on_enqueue(&self, task: &TaskMeta) {
        let Some(timeout) = self.params.load().queue_timeout else {
            return;
        };
        if let Some(pool) = self.pool.upgrade() {
            self.watcher.watch(task, &pool, timeout);
        }
    }

    fn on_dequeue(&self, task: &TaskMeta) {
        self.watcher.cancel(task.id);
    }

    fn before_execute(&self, task: &TaskMeta) {
        self.hooks.before_execute(&self.pool_name, task);
    }

    fn after_execute(&self, task: &TaskMeta, outcome: &TaskOutcome) {
        self.hooks.after_execute(&self.pool_name, task, outcome);
    }
}
