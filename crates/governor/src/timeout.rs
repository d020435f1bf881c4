//! Queue-timeout watching
//!
//! Every watched task gets a one-shot timer on the async runtime. Whichever
//! side removes the task's entry first wins: the dequeue path (the task left
//! the queue in time) or the timer (it did not). A task therefore raises at
//! most one queue-timeout event.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::adapter::PoolAdapter;
use crate::alarm::{AlarmEngine, AlarmSample, Evaluation};
use crate::config::NotifyRuleKind;
use crate::executor::{TaskId, TaskMeta};

struct WatchEntry {
    pool: Weak<dyn PoolAdapter>,
    pool_name: String,
    enqueued_at: Instant,
    correlation_id: Option<String>,
    timer: Option<AbortHandle>,
}

/// Tracks queued tasks against their pool's queue timeout
pub struct QueueTimeoutWatcher {
    entries: Arc<DashMap<TaskId, WatchEntry>>,
    engine: Arc<AlarmEngine>,
    runtime: Handle,
}

impl QueueTimeoutWatcher {
    pub fn new(runtime: Handle, engine: Arc<AlarmEngine>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            engine,
            runtime,
        }
    }

    /// Start watching a task that was just queued on `pool`
    ///
    /// Never blocks; safe to call with the pool lock held.
    pub fn watch(&self, task: &TaskMeta, pool: &Arc<dyn PoolAdapter>, timeout: Duration) {
        let task_id = task.id;
        self.entries.insert(
            task_id,
            WatchEntry {
                pool: Arc::downgrade(pool),
                pool_name: pool.name().to_string(),
                enqueued_at: Instant::now(),
                correlation_id: task.context.correlation_id.clone(),
                timer: None,
            },
        );

        let entries = Arc::clone(&self.entries);
        let engine = Arc::clone(&self.engine);
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((task_id, entry)) = entries.remove(&task_id) {
                fire(&engine, task_id, entry);
            }
        });

        // the timer may already have fired or been cancelled
        if let Some(mut entry) = self.entries.get_mut(&task_id) {
            entry.timer = Some(timer.abort_handle());
        }
    }

    /// Stop watching a task; true when the watch was still armed
    pub fn cancel(&self, task_id: TaskId) -> bool {
        match self.entries.remove(&task_id) {
            Some((_, entry)) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                trace!(pool = %entry.pool_name, %task_id, "queue timeout watch cancelled");
                true
            }
            None => false,
        }
    }

    /// Number of armed watches
    pub fn pending(&self) -> usize {
        self.entries.len()
    }
}

fn fire(engine: &AlarmEngine, task_id: TaskId, entry: WatchEntry) {
    let elapsed = entry.enqueued_at.elapsed();
    let Some(pool) = entry.pool.upgrade() else {
        trace!(pool = %entry.pool_name, %task_id, "pool gone before queue timeout fired");
        return;
    };

    debug!(
        pool = %entry.pool_name,
        %task_id,
        elapsed_ms = elapsed.as_millis() as u64,
        correlation_id = ?entry.correlation_id,
        "task exceeded queue timeout"
    );

    let sample = AlarmSample::queue_timeout(pool.stats(), task_id, elapsed, entry.correlation_id);
    let evaluation = engine.evaluate(&entry.pool_name, NotifyRuleKind::QueueTimeout, sample);
    if evaluation == Evaluation::Dispatched {
        debug!(pool = %entry.pool_name, %task_id, "queue timeout alarm dispatched");
    }
}
