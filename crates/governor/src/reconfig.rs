//! Live reconfiguration
//!
//! Applies new [`PoolParams`] to a running pool without losing queued work.
//! Everything that can fail is checked before the first mutation, so a
//! refused update leaves the pool exactly as it was.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::alarm::AlarmEngine;
use crate::config::{NotifyRule, PoolParams, SaturationPolicy};
use crate::error::GovernorError;
use crate::handle::PoolHandle;
use crate::reject::CustomActions;

/// Validates and applies parameter and rule updates
pub struct ReconfigurationController {
    engine: Arc<AlarmEngine>,
    custom: Arc<CustomActions>,
    apply_lock: Mutex<()>,
}

impl ReconfigurationController {
    pub fn new(engine: Arc<AlarmEngine>, custom: Arc<CustomActions>) -> Self {
        Self {
            engine,
            custom,
            apply_lock: Mutex::new(()),
        }
    }

    /// Check parameters without touching any pool
    pub fn validate(&self, params: &PoolParams) -> Result<(), GovernorError> {
        params.validate()?;
        if let SaturationPolicy::Custom(name) = &params.saturation_policy {
            if !self.custom.contains(name) {
                return Err(GovernorError::InvalidConfig(format!(
                    "no custom reject action registered as {:?}",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Apply new parameters; returns the changed fields as `field: old => new`
    ///
    /// Sizes are applied so that `core <= max` holds at every instant:
    /// growing max goes before core, shrinking core goes before max.
    #[instrument(skip(self, handle, params), fields(pool = %handle.name()))]
    pub fn apply(
        &self,
        handle: &PoolHandle,
        params: PoolParams,
    ) -> Result<Vec<String>, GovernorError> {
        self.validate(&params)?;
        let _guard = self.apply_lock.lock();

        let current = handle.params();
        let changes = current.diff(&params);
        if changes.is_empty() {
            debug!("configuration unchanged");
            return Ok(changes);
        }

        let pool = handle.adapter();
        let current_capacity = pool.queue_capacity();
        if params.queue_capacity != current_capacity && !pool.supports_queue_resize() {
            return Err(GovernorError::UnsupportedResize {
                pool: handle.name().to_string(),
                current: current_capacity,
                requested: params.queue_capacity,
            });
        }

        if params.max_size >= pool.max_size() {
            pool.set_max_size(params.max_size)?;
            pool.set_core_size(params.core_size)?;
        } else {
            pool.set_core_size(params.core_size)?;
            pool.set_max_size(params.max_size)?;
        }

        // a zero keep-alive is only valid once core timeout is off
        if params.keep_alive.is_zero() {
            pool.set_allow_core_timeout(params.allow_core_timeout)?;
            pool.set_keep_alive(params.keep_alive)?;
        } else {
            pool.set_keep_alive(params.keep_alive)?;
            pool.set_allow_core_timeout(params.allow_core_timeout)?;
        }

        if params.queue_capacity != current_capacity {
            pool.set_queue_capacity(params.queue_capacity)?;
        }

        handle.params_cell().store(params);
        info!(changes = %changes.join(", "), "pool reconfigured");
        Ok(changes)
    }

    /// Replace a pool's notify rules; their alarm state starts over
    #[instrument(skip(self, handle, rules), fields(pool = %handle.name()))]
    pub fn apply_rules(&self, handle: &PoolHandle, rules: Vec<NotifyRule>) {
        let kinds: Vec<String> = rules.iter().map(|r| r.kind.to_string()).collect();
        self.engine.set_rules(handle.name(), rules);
        info!(rules = ?kinds, "notify rules applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::PoolAdapter;
    use crate::alarm::RetryPolicy;
    use crate::aware::{AwareRegistry, HookDispatcher};
    use crate::config::NotifyRuleKind;
    use crate::executor::{QueueKind, ThreadPool, ThreadPoolConfig};
    use crate::handle::ParamsSnapshot;
    use std::time::Duration;
    use tokio::runtime::Handle;

    fn controller() -> (ReconfigurationController, Arc<AlarmEngine>, Arc<CustomActions>) {
        let engine = Arc::new(AlarmEngine::new(
            Handle::current(),
            HookDispatcher::new(Arc::new(AwareRegistry::new())),
            RetryPolicy::no_retry(),
        ));
        let custom = Arc::new(CustomActions::new());
        (
            ReconfigurationController::new(engine.clone(), custom.clone()),
            engine,
            custom,
        )
    }

    fn handle(params: PoolParams, kind: QueueKind) -> PoolHandle {
        let pool: Arc<dyn PoolAdapter> = Arc::new(
            ThreadPool::new(
                ThreadPoolConfig::new("cfg-pool", params.core_size, params.max_size)
                    .with_queue(kind, params.queue_capacity)
                    .with_keep_alive(params.keep_alive),
            )
            .unwrap(),
        );
        PoolHandle::new("cfg-pool", pool, Arc::new(ParamsSnapshot::new(params)))
    }

    #[tokio::test]
    async fn test_grow_and_shrink() {
        let (controller, _, _) = controller();
        let handle = handle(PoolParams::new(2, 4, 10), QueueKind::Resizable);

        let changes = controller
            .apply(&handle, PoolParams::new(6, 8, 20))
            .unwrap();
        assert_eq!(changes.len(), 3);
        assert_eq!(handle.adapter().core_size(), 6);
        assert_eq!(handle.adapter().max_size(), 8);
        assert_eq!(handle.adapter().queue_capacity(), 20);

        controller.apply(&handle, PoolParams::new(1, 2, 20)).unwrap();
        assert_eq!(handle.adapter().core_size(), 1);
        assert_eq!(handle.adapter().max_size(), 2);
        assert_eq!(handle.params().max_size, 2);
    }

    #[tokio::test]
    async fn test_invalid_config_leaves_pool_untouched() {
        let (controller, _, _) = controller();
        let handle = handle(PoolParams::new(2, 4, 10), QueueKind::Resizable);

        let err = controller
            .apply(&handle, PoolParams::new(5, 3, 10))
            .unwrap_err();
        assert!(matches!(err, GovernorError::InvalidConfig(_)));
        assert_eq!(*handle.params(), PoolParams::new(2, 4, 10));
        assert_eq!(handle.adapter().core_size(), 2);
        assert_eq!(handle.adapter().max_size(), 4);
    }

    #[tokio::test]
    async fn test_unknown_custom_policy_rejected() {
        let (controller, _, custom) = controller();
        let handle = handle(PoolParams::new(1, 2, 10), QueueKind::Resizable);
        let params = PoolParams::new(1, 2, 10)
            .with_saturation_policy(SaturationPolicy::Custom("spill".into()));

        assert!(matches!(
            controller.apply(&handle, params.clone()),
            Err(GovernorError::InvalidConfig(_))
        ));

        struct Spill;
        impl crate::reject::CustomRejectAction for Spill {
            fn reject(
                &self,
                _: crate::executor::Task,
                _: &dyn PoolAdapter,
            ) -> Result<(), crate::executor::ExecutorError> {
                Ok(())
            }
        }
        custom.register("spill", Arc::new(Spill));
        assert!(controller.apply(&handle, params).is_ok());
    }

    #[tokio::test]
    async fn test_fixed_queue_resize_refused_before_any_change() {
        let (controller, _, _) = controller();
        let handle = handle(PoolParams::new(2, 4, 100), QueueKind::Fixed);

        let err = controller
            .apply(&handle, PoolParams::new(3, 6, 50))
            .unwrap_err();
        assert!(matches!(
            err,
            GovernorError::UnsupportedResize {
                current: 100,
                requested: 50,
                ..
            }
        ));
        assert_eq!(handle.adapter().core_size(), 2);
        assert_eq!(handle.adapter().max_size(), 4);
        assert_eq!(handle.params().queue_capacity, 100);
    }

    #[tokio::test]
    async fn test_unchanged_config_is_noop() {
        let (controller, _, _) = controller();
        let params = PoolParams::new(2, 4, 10);
        let handle = handle(params.clone(), QueueKind::Fixed);
        let before = handle.params();

        assert!(controller.apply(&handle, params).unwrap().is_empty());
        assert!(Arc::ptr_eq(&before, &handle.params()));
    }

    #[tokio::test]
    async fn test_keep_alive_and_core_timeout() {
        let (controller, _, _) = controller();
        let handle = handle(PoolParams::new(2, 4, 10), QueueKind::Resizable);

        let params = PoolParams::new(2, 4, 10)
            .with_keep_alive(Duration::from_millis(250))
            .with_allow_core_timeout(true);
        controller.apply(&handle, params).unwrap();
        assert_eq!(handle.adapter().keep_alive(), Duration::from_millis(250));

        let params = PoolParams::new(2, 4, 10).with_keep_alive(Duration::ZERO);
        controller.apply(&handle, params).unwrap();
        assert_eq!(handle.adapter().keep_alive(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_apply_rules_resets_state() {
        let (controller, engine, _) = controller();
        let handle = handle(PoolParams::new(1, 1, 1), QueueKind::Fixed);
        controller.apply_rules(&handle, vec![NotifyRule::new(NotifyRuleKind::Reject).with_threshold(5)]);

        let task = crate::executor::Task::new(Default::default(), || {});
        engine.evaluate(
            "cfg-pool",
            NotifyRuleKind::Reject,
            crate::alarm::AlarmSample::rejected(handle.stats(), task.meta()),
        );
        assert_eq!(engine.pending_count("cfg-pool", NotifyRuleKind::Reject), 1);

        controller.apply_rules(&handle, vec![NotifyRule::new(NotifyRuleKind::Reject).with_threshold(5)]);
        assert_eq!(engine.pending_count("cfg-pool", NotifyRuleKind::Reject), 0);
        assert_eq!(engine.rules("cfg-pool")[0].threshold, 5);
    }
}
