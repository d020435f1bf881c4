//! Pluggable lifecycle observers
//!
//! This module provides:
//! - [`AwareRegistry`] - One active implementation per capability kind
//! - [`HookDispatcher`] - Resolves and invokes hooks with failure isolation
//!
//! Capabilities form a closed set: [`ExecutionAware`], [`RejectionAware`]
//! and [`AlarmAware`]. The registry is an explicit instance built at
//! startup and shared by reference; there is no global table.

mod dispatcher;
mod registry;

pub use dispatcher::{HookDispatcher, HookFailure, HookOutcome};
pub use registry::{
    AlarmAware, AwareRegistry, Capability, CapabilityKind, ExecutionAware, RejectionAware,
};
