//! # Pool Governor
//!
//! Live governance for worker-thread pools: resize, monitor and protect
//! pools against overload without restarting them or losing queued work.
//!
//! ## Features
//!
//! - **Live reconfiguration**: core/max threads, queue capacity, keep-alive and
//!   saturation policy change on a running pool, never breaking `core <= max`
//! - **Rejection governance**: counting, alarms and hooks before the
//!   configured saturation policy (abort, discard, discard-oldest,
//!   caller-runs or a named custom action)
//! - **Alarms**: threshold rules with lock-free per-rule cooldown, dispatched
//!   off the task path with bounded retry
//! - **Queue-timeout watching**: one-shot timers per queued task, raced
//!   against dequeue so each task fires at most once
//! - **Lifecycle hooks**: execution, rejection and alarm observers whose
//!   failures are logged and contained
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Governor                             │
//! │  (pool table, register / submit / apply_config / stats)     │
//! └─────────────────────────────────────────────────────────────┘
//!          │ PoolAdapter                     │ apply
//!          ▼                                 ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │ ThreadPool (OS threads)  │   │ ReconfigurationController     │
//! │  interceptor, rejection  │   │  validate, order, swap        │
//! └──────────────────────────┘   └──────────────────────────────┘
//!          │ reject / timeout / sample
//!          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        AlarmEngine                           │
//! │  (rules, cooldown CAS, async dispatch on the tokio runtime) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use poolwarden_governor::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), GovernorError> {
//! let governor = Governor::builder()
//!     .settings(GovernorSettings::from_env())
//!     .notifier(std::sync::Arc::new(LogNotifier))
//!     .build()?;
//!
//! governor.register_pool(
//!     "io-pool",
//!     PoolParams::new(2, 4, 10)
//!         .with_saturation_policy(SaturationPolicy::CallerRuns)
//!         .with_queue_timeout(Duration::from_millis(500)),
//!     vec![NotifyRule::new(NotifyRuleKind::Reject).with_recipients(["ops"])],
//!     QueueKind::Resizable,
//! )?;
//!
//! let ctx = TaskContext::new().with_correlation_id("req-1");
//! governor.submit("io-pool", ctx, || { /* blocking work */ })?;
//!
//! let monitor = governor.start_monitor();
//! monitor.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod alarm;
pub mod aware;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod governor;
pub mod handle;
pub mod monitor;
pub mod reconfig;
pub mod reject;
pub mod stats;
pub mod timeout;

/// Prelude for common imports
pub mod prelude {
    pub use crate::adapter::PoolAdapter;
    pub use crate::alarm::{
        AlarmPayload, ChannelNotifier, Evaluation, LogNotifier, Notifier, RetryPolicy,
    };
    pub use crate::aware::{
        AlarmAware, AwareRegistry, Capability, ExecutionAware, RejectionAware,
    };
    pub use crate::config::{
        GovernorSettings, NotifyRule, NotifyRuleKind, PoolParams, SaturationPolicy,
    };
    pub use crate::context::TaskContext;
    pub use crate::error::GovernorError;
    pub use crate::executor::{QueueKind, Task, TaskId, TaskOutcome};
    pub use crate::governor::{Governor, GovernorBuilder};
    pub use crate::handle::PoolHandle;
    pub use crate::reject::CustomRejectAction;
    pub use crate::stats::PoolStats;
}

// Re-export key types at crate root
pub use adapter::PoolAdapter;
pub use alarm::{AlarmEngine, AlarmPayload, Evaluation, Notifier, RetryPolicy};
pub use aware::{AwareRegistry, Capability, HookDispatcher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GovernorSettings, NotifyRule, NotifyRuleKind, PoolParams, SaturationPolicy};
pub use context::TaskContext;
pub use error::GovernorError;
pub use executor::{QueueKind, Task, TaskId, TaskMeta, TaskOutcome, ThreadPool};
pub use governor::{Governor, GovernorBuilder};
pub use handle::PoolHandle;
pub use monitor::MonitorHandle;
pub use reconfig::ReconfigurationController;
pub use reject::{CustomRejectAction, RejectionGovernor};
pub use stats::PoolStats;
pub use timeout::QueueTimeoutWatcher;
