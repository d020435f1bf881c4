//! Capability registry

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alarm::AlarmPayload;
use crate::executor::{TaskMeta, TaskOutcome};
use crate::stats::PoolStats;

/// Observer of task execution
pub trait ExecutionAware: Send + Sync {
    /// Runs on the worker thread before the task body
    fn before_execute(&self, _pool: &str, _task: &TaskMeta) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs on the worker thread after the task body
    fn after_execute(
        &self,
        _pool: &str,
        _task: &TaskMeta,
        _outcome: &TaskOutcome,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Observer of rejections; runs before the saturation policy and cannot veto it
pub trait RejectionAware: Send + Sync {
    fn before_reject(&self, pool: &str, task: &TaskMeta, stats: &PoolStats) -> anyhow::Result<()>;
}

/// Observer of alarms about to be dispatched
pub trait AlarmAware: Send + Sync {
    fn before_alarm(&self, payload: &AlarmPayload) -> anyhow::Result<()>;
}

/// Capability kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    ExecutionAware,
    RejectionAware,
    AlarmAware,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionAware => write!(f, "execution-aware"),
            Self::RejectionAware => write!(f, "rejection-aware"),
            Self::AlarmAware => write!(f, "alarm-aware"),
        }
    }
}

/// A registered implementation
#[derive(Clone)]
pub enum Capability {
    Execution(Arc<dyn ExecutionAware>),
    Rejection(Arc<dyn RejectionAware>),
    Alarm(Arc<dyn AlarmAware>),
}

impl Capability {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::Execution(_) => CapabilityKind::ExecutionAware,
            Self::Rejection(_) => CapabilityKind::RejectionAware,
            Self::Alarm(_) => CapabilityKind::AlarmAware,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({})", self.kind())
    }
}

/// Capability kind to implementation table
///
/// Registration is last-writer-wins. Consumers resolve on every use and
/// never hold on to a resolved implementation.
#[derive(Default)]
pub struct AwareRegistry {
    entries: RwLock<HashMap<CapabilityKind, Capability>>,
}

impl AwareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation, returning the one it replaced
    pub fn register(&self, capability: Capability) -> Option<Capability> {
        let kind = capability.kind();
        let previous = self.entries.write().insert(kind, capability);
        debug!(%kind, replaced = previous.is_some(), "capability registered");
        previous
    }

    pub fn unregister(&self, kind: CapabilityKind) -> Option<Capability> {
        self.entries.write().remove(&kind)
    }

    pub fn resolve(&self, kind: CapabilityKind) -> Option<Capability> {
        self.entries.read().get(&kind).cloned()
    }

    pub fn is_registered(&self, kind: CapabilityKind) -> bool {
        self.entries.read().contains_key(&kind)
    }

    pub fn execution_aware(&self) -> Option<Arc<dyn ExecutionAware>> {
        match self.resolve(CapabilityKind::ExecutionAware) {
            Some(Capability::Execution(hook)) => Some(hook),
            _ => None,
        }
    }

    pub fn rejection_aware(&self) -> Option<Arc<dyn RejectionAware>> {
        match self.resolve(CapabilityKind::RejectionAware) {
            Some(Capability::Rejection(hook)) => Some(hook),
            _ => None,
        }
    }

    pub fn alarm_aware(&self) -> Option<Arc<dyn AlarmAware>> {
        match self.resolve(CapabilityKind::AlarmAware) {
            Some(Capability::Alarm(hook)) => Some(hook),
            _ => None,
        }
    }
}
