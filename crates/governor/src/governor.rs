//! Governor facade
//!
//! Owns the pool table and wires every registered pool to the shared
//! governance components:
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!   submit ─────────►│ ThreadPool (PoolAdapter)     │
//!                    │  interceptor ─► watcher/hooks│
//!                    │  rejection   ─► governor     │
//!                    └──────────────┬───────────────┘
//!                                   │ evaluate
//!   monitor tick ──────────────────►▼
//!                              AlarmEngine ──► notifiers (runtime)
//!
//!   apply_config / apply_rules ──► ReconfigurationController
//! ```

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::info;

use crate::adapter::PoolAdapter;
use crate::alarm::{AlarmEngine, Notifier};
use crate::aware::{AwareRegistry, Capability, HookDispatcher};
use crate::clock::{Clock, SystemClock};
use crate::config::{GovernorSettings, NotifyRule, PoolParams};
use crate::context::TaskContext;
use crate::error::GovernorError;
use crate::executor::{QueueKind, TaskId, ThreadPool, ThreadPoolConfig};
use crate::handle::{GovernedInterceptor, ParamsSnapshot, PoolHandle};
use crate::monitor::{self, MonitorHandle};
use crate::reconfig::ReconfigurationController;
use crate::reject::{CustomActions, CustomRejectAction, RejectionGovernor};
use crate::stats::PoolStats;
use crate::timeout::QueueTimeoutWatcher;

/// Builder for [`Governor`]
pub struct GovernorBuilder {
    settings: GovernorSettings,
    runtime: Option<Handle>,
    clock: Arc<dyn Clock>,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl Default for GovernorBuilder {
    fn default() -> Self {
        Self {
            settings: GovernorSettings::default(),
            runtime: None,
            clock: Arc::new(SystemClock::new()),
            notifiers: Vec::new(),
        }
    }
}

impl GovernorBuilder {
    pub fn settings(mut self, settings: GovernorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Runtime for timers, alarm dispatch and the monitor (default: current)
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Clock for alarm cooldowns
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn build(self) -> Result<Governor, GovernorError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| GovernorError::NoRuntime(e.to_string()))?,
        };

        let registry = Arc::new(AwareRegistry::new());
        let hooks = HookDispatcher::new(registry.clone());
        let engine = Arc::new(
            AlarmEngine::new(
                runtime.clone(),
                hooks.clone(),
                self.settings.dispatch_retry.clone(),
            )
            .with_clock(self.clock),
        );
        for notifier in self.notifiers {
            engine.add_notifier(notifier);
        }
        let watcher = Arc::new(QueueTimeoutWatcher::new(runtime.clone(), engine.clone()));
        let custom = Arc::new(CustomActions::new());
        let controller = ReconfigurationController::new(engine.clone(), custom.clone());

        Ok(Governor {
            pools: Arc::new(DashMap::new()),
            registry,
            hooks,
            engine,
            watcher,
            controller,
            custom,
            settings: self.settings,
            runtime,
        })
    }
}

/// Registry and entry point of every governed pool
///
/// # Example
///
/// ```
/// use poolwarden_governor::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), GovernorError> {
/// let governor = Governor::new(GovernorSettings::default())?;
/// governor.register_pool(
///     "io-pool",
///     PoolParams::new(2, 4, 10),
///     NotifyRule::defaults(),
///     QueueKind::Resizable,
/// )?;
///
/// governor.submit("io-pool", TaskContext::new(), || println!("working"))?;
/// governor.apply_config("io-pool", PoolParams::new(4, 8, 20))?;
/// # Ok(())
/// # }
/// ```
pub struct Governor {
    pools: Arc<DashMap<String, Arc<PoolHandle>>>,
    registry: Arc<AwareRegistry>,
    hooks: HookDispatcher,
    engine: Arc<AlarmEngine>,
    watcher: Arc<QueueTimeoutWatcher>,
    controller: ReconfigurationController,
    custom: Arc<CustomActions>,
    settings: GovernorSettings,
    runtime: Handle,
}

impl Governor {
    /// Create a governor on the current tokio runtime
    pub fn new(settings: GovernorSettings) -> Result<Self, GovernorError> {
        Self::builder().settings(settings).build()
    }

    pub fn builder() -> GovernorBuilder {
        GovernorBuilder::default()
    }

    /// Create, wire and register a pool
    pub fn register_pool(
        &self,
        name: &str,
        params: PoolParams,
        rules: Vec<NotifyRule>,
        queue_kind: QueueKind,
    ) -> Result<Arc<PoolHandle>, GovernorError> {
        self.controller.validate(&params)?;

        let slot = match self.pools.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(GovernorError::DuplicatePool(name.to_string())),
            Entry::Vacant(slot) => slot,
        };

        let pool = Arc::new(ThreadPool::new(
            ThreadPoolConfig::new(name, params.core_size, params.max_size)
                .with_queue(queue_kind, params.queue_capacity)
                .with_keep_alive(params.keep_alive)
                .with_allow_core_timeout(params.allow_core_timeout),
        )?);
        let adapter: Arc<dyn PoolAdapter> = pool.clone();
        let cell = Arc::new(ParamsSnapshot::new(params.clone()));

        pool.set_interceptor(Arc::new(GovernedInterceptor::new(
            &adapter,
            cell.clone(),
            self.watcher.clone(),
            self.hooks.clone(),
        )));
        pool.set_rejection_handler(Arc::new(RejectionGovernor::new(
            name,
            cell.clone(),
            self.engine.clone(),
            self.hooks.clone(),
            self.watcher.clone(),
            self.custom.clone(),
        )));
        self.engine.set_rules(name, rules);

        let handle = Arc::new(PoolHandle::new(name, adapter, cell));
        slot.insert(handle.clone());

        info!(
            pool = name,
            core_size = params.core_size,
            max_size = params.max_size,
            queue_capacity = params.queue_capacity,
            ?queue_kind,
            policy = %params.saturation_policy,
            "pool registered"
        );
        Ok(handle)
    }

    pub fn pool(&self, name: &str) -> Result<Arc<PoolHandle>, GovernorError> {
        self.pools
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| GovernorError::PoolNotFound(name.to_string()))
    }

    /// Names of every registered pool, sorted
    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Submit a closure to a pool
    pub fn submit<F>(&self, name: &str, context: TaskContext, f: F) -> Result<TaskId, GovernorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool(name)?.submit(context, f)
    }

    /// Apply new parameters; returns the changed fields
    pub fn apply_config(
        &self,
        name: &str,
        params: PoolParams,
    ) -> Result<Vec<String>, GovernorError> {
        let handle = self.pool(name)?;
        self.controller.apply(&handle, params)
    }

    /// Replace a pool's notify rules
    pub fn apply_rules(&self, name: &str, rules: Vec<NotifyRule>) -> Result<(), GovernorError> {
        let handle = self.pool(name)?;
        self.controller.apply_rules(&handle, rules);
        Ok(())
    }

    pub fn stats(&self, name: &str) -> Result<PoolStats, GovernorError> {
        Ok(self.pool(name)?.stats())
    }

    /// Stats of every pool, ordered by name
    pub fn all_stats(&self) -> Vec<PoolStats> {
        let handles: Vec<Arc<PoolHandle>> =
            self.pools.iter().map(|e| Arc::clone(e.value())).collect();
        let mut stats: Vec<PoolStats> = handles.iter().map(|h| h.stats()).collect();
        stats.sort_by(|a, b| a.pool_name.cmp(&b.pool_name));
        stats
    }

    /// Unregister a pool and stop its intake; queued tasks still drain
    ///
    /// The returned handle can be used to await termination.
    pub fn shutdown_pool(&self, name: &str) -> Result<Arc<PoolHandle>, GovernorError> {
        let (_, handle) = self
            .pools
            .remove(name)
            .ok_or_else(|| GovernorError::PoolNotFound(name.to_string()))?;
        handle.adapter().shutdown();
        self.engine.remove_pool(name);
        info!(pool = name, "pool unregistered");
        Ok(handle)
    }

    /// Register a named action usable as `SaturationPolicy::Custom(name)`
    pub fn register_custom_action(&self, name: &str, action: Arc<dyn CustomRejectAction>) {
        self.custom.register(name, action);
    }

    /// Register a lifecycle hook, replacing any hook of the same kind
    pub fn register_hook(&self, capability: Capability) -> Option<Capability> {
        self.registry.register(capability)
    }

    pub fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.engine.add_notifier(notifier);
    }

    /// Start sampling capacity and liveness every `monitor_interval`
    pub fn start_monitor(&self) -> MonitorHandle {
        monitor::spawn(
            &self.runtime,
            self.settings.monitor_interval,
            self.pools.clone(),
            self.engine.clone(),
        )
    }

    /// Take one capacity/liveness sample of every pool now
    pub fn sample_now(&self) {
        monitor::sample(&self.pools, &self.engine);
    }

    pub fn registry(&self) -> &Arc<AwareRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<AlarmEngine> {
        &self.engine
    }

    pub fn watcher(&self) -> &Arc<QueueTimeoutWatcher> {
        &self.watcher
    }

    pub fn settings(&self) -> &GovernorSettings {
        &self.settings
    }
}
