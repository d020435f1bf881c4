//! Hook dispatch with failure isolation
//!
//! A hook that returns an error or panics is logged and treated as absent
//! for that invocation. Nothing a hook does can break the task path.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::{trace, warn};

use super::registry::AwareRegistry;
use crate::alarm::AlarmPayload;
use crate::executor::{panic_message, TaskMeta, TaskOutcome};
use crate::stats::PoolStats;

/// A hook invocation that failed
#[derive(Debug, Clone, Error)]
#[error("{hook} hook failed for pool {pool}: {reason}")]
pub struct HookFailure {
    pub hook: &'static str,
    pub pool: String,
    pub reason: String,
}

/// Result of one dispatch
#[derive(Debug, Clone)]
pub enum HookOutcome {
    /// No implementation registered for the capability
    Absent,
    /// The hook ran and returned normally
    Invoked,
    /// The hook errored or panicked; already logged
    Failed(HookFailure),
}

impl HookOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Resolves capabilities from the registry and invokes them
///
/// Pre-hooks run synchronously on the caller's thread. `after_execute` runs
/// on the worker thread once the body returns, so it is ordered before the
/// worker's next task.
#[derive(Clone)]
pub struct HookDispatcher {
    registry: Arc<AwareRegistry>,
}

impl HookDispatcher {
    pub fn new(registry: Arc<AwareRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<AwareRegistry> {
        &self.registry
    }

    pub fn before_execute(&self, pool: &str, task: &TaskMeta) -> HookOutcome {
        match self.registry.execution_aware() {
            Some(hook) => invoke("before_execute", pool, || hook.before_execute(pool, task)),
            None => HookOutcome::Absent,
        }
    }

    pub fn after_execute(&self, pool: &str, task: &TaskMeta, outcome: &TaskOutcome) -> HookOutcome {
        match self.registry.execution_aware() {
            Some(hook) => invoke("after_execute", pool, || {
                hook.after_execute(pool, task, outcome)
            }),
            None => HookOutcome::Absent,
        }
    }

    pub fn before_reject(&self, pool: &str, task: &TaskMeta, stats: &PoolStats) -> HookOutcome {
        match self.registry.rejection_aware() {
            Some(hook) => invoke("before_reject", pool, || {
                hook.before_reject(pool, task, stats)
            }),
            None => HookOutcome::Absent,
        }
    }

    pub fn before_alarm(&self, payload: &AlarmPayload) -> HookOutcome {
        match self.registry.alarm_aware() {
            Some(hook) => invoke("before_alarm", &payload.pool_name, || {
                hook.before_alarm(payload)
            }),
            None => HookOutcome::Absent,
        }
    }
}

fn invoke<F>(hook: &'static str, pool: &str, f: F) -> HookOutcome
where
    F: FnOnce() -> anyhow::Result<()>,
{
    let reason = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {
            trace!(hook, pool, "hook invoked");
            return HookOutcome::Invoked;
        }
        Ok(Err(e)) => format!("{:#}", e),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };

    let failure = HookFailure {
        hook,
        pool: pool.to_string(),
        reason,
    };
    warn!(hook, pool, error = %failure, "hook failed, ignoring");
    HookOutcome::Failed(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aware::{Capability, ExecutionAware, RejectionAware};
    use crate::context::TaskContext;
    use crate::executor::Task;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingExec;

    impl ExecutionAware for FailingExec {
        fn before_execute(&self, _: &str, _: &TaskMeta) -> anyhow::Result<()> {
            anyhow::bail!("observer unavailable")
        }

        fn after_execute(&self, _: &str, _: &TaskMeta, _: &TaskOutcome) -> anyhow::Result<()> {
            panic!("observer bug")
        }
    }

    struct CountingReject(AtomicUsize);

    impl RejectionAware for CountingReject {
        fn before_reject(&self, _: &str, _: &TaskMeta, _: &PoolStats) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn meta() -> TaskMeta {
        Task::new(TaskContext::new(), || {}).meta().clone()
    }

    #[test]
    fn test_absent_hooks() {
        let dispatcher = HookDispatcher::new(Arc::new(AwareRegistry::new()));
        assert!(matches!(
            dispatcher.before_execute("p", &meta()),
            HookOutcome::Absent
        ));
        assert!(matches!(
            dispatcher.before_reject("p", &meta(), &PoolStats::default()),
            HookOutcome::Absent
        ));
    }

    #[test]
    fn test_error_is_contained() {
        let registry = Arc::new(AwareRegistry::new());
        registry.register(Capability::Execution(Arc::new(FailingExec)));
        let dispatcher = HookDispatcher::new(registry);

        match dispatcher.before_execute("io-pool", &meta()) {
            HookOutcome::Failed(failure) => {
                assert_eq!(failure.hook, "before_execute");
                assert_eq!(failure.pool, "io-pool");
                assert!(failure.reason.contains("observer unavailable"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_panic_is_contained() {
        let registry = Arc::new(AwareRegistry::new());
        registry.register(Capability::Execution(Arc::new(FailingExec)));
        let dispatcher = HookDispatcher::new(registry);

        let outcome = dispatcher.after_execute("io-pool", &meta(), &TaskOutcome::Completed);
        assert!(outcome.is_failed());
        if let HookOutcome::Failed(failure) = outcome {
            assert!(failure.reason.contains("observer bug"));
        }
    }

    #[test]
    fn test_resolves_current_registration() {
        let registry = Arc::new(AwareRegistry::new());
        let dispatcher = HookDispatcher::new(registry.clone());

        let first = Arc::new(CountingReject(AtomicUsize::new(0)));
        let second = Arc::new(CountingReject(AtomicUsize::new(0)));

        registry.register(Capability::Rejection(first.clone()));
        dispatcher.before_reject("p", &meta(), &PoolStats::default());

        registry.register(Capability::Rejection(second.clone()));
        dispatcher.before_reject("p", &meta(), &PoolStats::default());
        dispatcher.before_reject("p", &meta(), &PoolStats::default());

        assert_eq!(first.0.load(Ordering::SeqCst), 1);
        assert_eq!(second.0.load(Ordering::SeqCst), 2);
    }
}
