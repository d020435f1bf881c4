//! Rejection governance
//!
//! Runs on the submitting thread whenever a governed pool cannot take a
//! task. Bookkeeping comes first and each step is isolated, so a failing
//! step never keeps the saturation policy from running:
//!
//! ```text
//! cancel watch ─► count ─► evaluate REJECT ─► before_reject ─► log ─► policy
//! ```

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::adapter::PoolAdapter;
use crate::alarm::{AlarmEngine, AlarmSample};
use crate::aware::HookDispatcher;
use crate::config::{NotifyRuleKind, SaturationPolicy};
use crate::executor::{panic_message, ExecutorError, RejectionHandler, Task, TaskOutcome, ThreadPool};
use crate::handle::ParamsSnapshot;
use crate::stats::PoolStats;
use crate::timeout::QueueTimeoutWatcher;

/// User-supplied saturation policy
///
/// Selected with [`SaturationPolicy::Custom`] by the name it was
/// registered under.
pub trait CustomRejectAction: Send + Sync {
    fn reject(&self, task: Task, pool: &dyn PoolAdapter) -> Result<(), ExecutorError>;
}

/// Named custom actions shared by every pool
#[derive(Default)]
pub struct CustomActions {
    actions: RwLock<HashMap<String, Arc<dyn CustomRejectAction>>>,
}

impl CustomActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action, replacing any action of the same name
    pub fn register(&self, name: impl Into<String>, action: Arc<dyn CustomRejectAction>) {
        self.actions.write().insert(name.into(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomRejectAction>> {
        self.actions.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.read().contains_key(name)
    }
}

/// Rejection handler installed on every governed pool
pub struct RejectionGovernor {
    pool_name: String,
    params: Arc<ParamsSnapshot>,
    engine: Arc<AlarmEngine>,
    hooks: HookDispatcher,
    watcher: Arc<QueueTimeoutWatcher>,
    custom: Arc<CustomActions>,
}

impl RejectionGovernor {
    pub fn new(
        pool_name: impl Into<String>,
        params: Arc<ParamsSnapshot>,
        engine: Arc<AlarmEngine>,
        hooks: HookDispatcher,
        watcher: Arc<QueueTimeoutWatcher>,
        custom: Arc<CustomActions>,
    ) -> Self {
        Self {
            pool_name: pool_name.into(),
            params,
            engine,
            hooks,
            watcher,
            custom,
        }
    }

    /// Handle one rejected task
    pub fn on_reject(&self, task: Task, pool: &dyn PoolAdapter) -> Result<(), ExecutorError> {
        if pool.is_shutdown() {
            debug!(pool = %self.pool_name, task_id = %task.id(), "pool shut down, task refused");
            return Err(ExecutorError::Shutdown(self.pool_name.clone()));
        }

        let meta = task.meta().clone();

        isolated("cancel_watch", &self.pool_name, || {
            self.watcher.cancel(meta.id);
        });
        isolated("record_rejection", &self.pool_name, || pool.record_rejection());

        let stats = pool.stats();
        isolated("evaluate", &self.pool_name, || {
            self.engine.evaluate(
                &self.pool_name,
                NotifyRuleKind::Reject,
                AlarmSample::rejected(stats.clone(), &meta),
            );
        });
        self.hooks.before_reject(&self.pool_name, &meta, &stats);

        let policy = self.params.load().saturation_policy.clone();
        log_exhausted(&stats, &policy, meta.context.correlation_id.as_deref());

        self.apply_policy(&policy, task, pool)
    }

    fn apply_policy(
        &self,
        policy: &SaturationPolicy,
        task: Task,
        pool: &dyn PoolAdapter,
    ) -> Result<(), ExecutorError> {
        match policy {
            SaturationPolicy::Abort => Err(ExecutorError::Rejected {
                pool: self.pool_name.clone(),
                task_id: task.id(),
            }),
            SaturationPolicy::Discard => {
                debug!(pool = %self.pool_name, task_id = %task.id(), "task discarded");
                Ok(())
            }
            SaturationPolicy::DiscardOldest => match pool.poll_oldest() {
                Some(oldest) => {
                    debug!(
                        pool = %self.pool_name,
                        discarded = %oldest.id(),
                        "oldest queued task discarded"
                    );
                    drop(oldest);
                    pool.submit(task)
                }
                None => {
                    // nothing queued to make room for: drop the newcomer
                    debug!(pool = %self.pool_name, task_id = %task.id(), "task discarded");
                    Ok(())
                }
            },
            SaturationPolicy::CallerRuns => {
                let (meta, outcome) = task.run();
                if let TaskOutcome::Panicked(message) = outcome {
                    warn!(
                        pool = %self.pool_name,
                        task_id = %meta.id,
                        panic = %message,
                        "task run by caller panicked"
                    );
                }
                Ok(())
            }
            SaturationPolicy::Custom(name) => match self.custom.get(name) {
                Some(action) => action.reject(task, pool),
                None => {
                    warn!(
                        pool = %self.pool_name,
                        action = %name,
                        "custom reject action not registered, aborting task"
                    );
                    Err(ExecutorError::Rejected {
                        pool: self.pool_name.clone(),
                        task_id: task.id(),
                    })
                }
            },
        }
    }
}

impl RejectionHandler for RejectionGovernor {
    fn rejected(&self, task: Task, pool: &ThreadPool) -> Result<(), ExecutorError> {
        self.on_reject(task, pool)
    }
}

/// Run a bookkeeping step, logging instead of propagating a panic
fn isolated(step: &'static str, pool: &str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        warn!(
            step,
            pool,
            panic = %panic_message(payload.as_ref()),
            "rejection step failed, continuing"
        );
    }
}

fn log_exhausted(stats: &PoolStats, policy: &SaturationPolicy, correlation_id: Option<&str>) {
    warn!(
        pool = %stats.pool_name,
        policy = %policy,
        pool_size = stats.pool_size,
        active_count = stats.active_count,
        core_size = stats.core_size,
        max_size = stats.max_size,
        largest_pool_size = stats.largest_pool_size,
        task_count = stats.task_count,
        completed_task_count = stats.completed_task_count,
        queue_capacity = stats.queue_capacity,
        queue_size = stats.queue_size,
        queue_remaining_capacity = stats.queue_remaining_capacity,
        reject_count = stats.reject_count,
        is_shutdown = stats.is_shutdown,
        is_terminated = stats.is_terminated,
        is_terminating = stats.is_terminating,
        correlation_id = ?correlation_id,
        "thread pool exhausted"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::RetryPolicy;
    use crate::aware::{AwareRegistry, Capability, RejectionAware};
    use crate::config::{NotifyRule, PoolParams};
    use crate::context::TaskContext;
    use crate::executor::{QueueKind, TaskMeta, ThreadPoolConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use tokio::runtime::Handle;

    struct Fixture {
        pool: Arc<ThreadPool>,
        engine: Arc<AlarmEngine>,
        registry: Arc<AwareRegistry>,
        custom: Arc<CustomActions>,
        release: mpsc::Sender<()>,
    }

    /// Single worker pool with a one-slot queue, both occupied
    fn saturated(policy: SaturationPolicy) -> Fixture {
        let registry = Arc::new(AwareRegistry::new());
        let hooks = HookDispatcher::new(registry.clone());
        let engine = Arc::new(AlarmEngine::new(
            Handle::current(),
            hooks.clone(),
            RetryPolicy::no_retry(),
        ));
        engine.set_rules("tiny", vec![NotifyRule::new(NotifyRuleKind::Reject)]);
        let watcher = Arc::new(QueueTimeoutWatcher::new(Handle::current(), engine.clone()));
        let custom = Arc::new(CustomActions::new());
        let params = Arc::new(ParamsSnapshot::new(
            PoolParams::new(1, 1, 1).with_saturation_policy(policy),
        ));

        let pool = Arc::new(
            ThreadPool::new(ThreadPoolConfig::new("tiny", 1, 1).with_queue(QueueKind::Fixed, 1))
                .unwrap(),
        );
        pool.set_rejection_handler(Arc::new(RejectionGovernor::new(
            "tiny",
            params,
            engine.clone(),
            hooks,
            watcher,
            custom.clone(),
        )));

        let (release, rx) = mpsc::channel::<()>();
        pool.execute(Task::new(TaskContext::new(), move || {
            let _ = rx.recv();
        }))
        .unwrap();
        pool.execute(Task::new(TaskContext::new(), || {})).unwrap();

        Fixture {
            pool,
            engine,
            registry,
            custom,
            release,
        }
    }

    #[tokio::test]
    async fn test_abort_counts_and_alarms() {
        let fx = saturated(SaturationPolicy::Abort);
        let err = fx
            .pool
            .execute(Task::new(TaskContext::new(), || {}))
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Rejected { .. }));
        assert_eq!(fx.pool.snapshot().reject_count, 1);
        assert_eq!(fx.engine.dispatch_count("tiny", NotifyRuleKind::Reject), 1);
        drop(fx.release);
    }

    #[tokio::test]
    async fn test_discard_drops_silently() {
        let fx = saturated(SaturationPolicy::Discard);
        assert!(fx.pool.execute(Task::new(TaskContext::new(), || {})).is_ok());
        assert_eq!(fx.pool.snapshot().reject_count, 1);
        drop(fx.release);
    }

    #[tokio::test]
    async fn test_discard_oldest_replaces_queue_head() {
        let fx = saturated(SaturationPolicy::DiscardOldest);
        let old_head = fx.pool.queued_task_ids();
        let newcomer = Task::new(TaskContext::new(), || {});
        let newcomer_id = newcomer.id();

        fx.pool.execute(newcomer).unwrap();
        let queued = fx.pool.queued_task_ids();
        assert_eq!(queued, vec![newcomer_id]);
        assert_ne!(queued, old_head);
        drop(fx.release);
    }

    #[tokio::test]
    async fn test_caller_runs_on_submitter_thread() {
        let fx = saturated(SaturationPolicy::CallerRuns);
        let caller = std::thread::current().id();
        let ran_on = Arc::new(parking_lot::Mutex::new(None));
        let slot = ran_on.clone();

        fx.pool
            .execute(Task::new(TaskContext::new(), move || {
                *slot.lock() = Some(std::thread::current().id());
            }))
            .unwrap();
        assert_eq!(*ran_on.lock(), Some(caller));
        drop(fx.release);
    }

    struct Spill(AtomicUsize);

    impl CustomRejectAction for Spill {
        fn reject(&self, _task: Task, _pool: &dyn PoolAdapter) -> Result<(), ExecutorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_custom_action() {
        let fx = saturated(SaturationPolicy::Custom("spill".into()));
        let spill = Arc::new(Spill(AtomicUsize::new(0)));
        fx.custom.register("spill", spill.clone());

        fx.pool.execute(Task::new(TaskContext::new(), || {})).unwrap();
        assert_eq!(spill.0.load(Ordering::SeqCst), 1);
        drop(fx.release);
    }

    #[tokio::test]
    async fn test_unregistered_custom_action_aborts() {
        let fx = saturated(SaturationPolicy::Custom("missing".into()));
        assert!(fx.pool.execute(Task::new(TaskContext::new(), || {})).is_err());
        drop(fx.release);
    }

    struct PanickingRejectHook;

    impl RejectionAware for PanickingRejectHook {
        fn before_reject(&self, _: &str, _: &TaskMeta, _: &PoolStats) -> anyhow::Result<()> {
            panic!("hook exploded")
        }
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_skip_policy() {
        let fx = saturated(SaturationPolicy::Discard);
        fx.registry
            .register(Capability::Rejection(Arc::new(PanickingRejectHook)));

        assert!(fx.pool.execute(Task::new(TaskContext::new(), || {})).is_ok());
        assert_eq!(fx.pool.snapshot().reject_count, 1);
        drop(fx.release);
    }

    #[tokio::test]
    async fn test_shutdown_pool_refuses_without_counting() {
        let fx = saturated(SaturationPolicy::Abort);
        fx.pool.shutdown();
        let err = fx
            .pool
            .execute(Task::new(TaskContext::new(), || {}))
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Shutdown(_)));
        assert_eq!(fx.pool.snapshot().reject_count, 0);
        drop(fx.release);
    }
}
