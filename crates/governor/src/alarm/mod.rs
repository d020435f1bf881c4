//! Alarm pipeline
//!
//! This module provides:
//! - [`AlarmEngine`] - Per-pool rule evaluation with lock-free cooldowns
//! - [`Notifier`] - Delivery backends ([`LogNotifier`], [`ChannelNotifier`])
//! - [`RetryPolicy`] - Bounded retry of failed deliveries
//!
//! # Flow
//!
//! ```text
//! reject / queue timeout / monitor sample
//!        │
//!        ▼
//! evaluate ──► rule? ──► threshold? ──► cooldown? ──► CAS last_dispatch
//!                                                        │ winner
//!                                                        ▼
//!                                   runtime.spawn: before_alarm, notifiers (retry)
//! ```

mod engine;
mod notifier;
mod payload;
mod retry;
mod state;

pub use engine::{AlarmEngine, Evaluation};
pub use notifier::{ChannelNotifier, DeliveredAlarm, DispatchError, LogNotifier, Notifier};
pub use payload::{AlarmPayload, AlarmSample, TriggerDetail};
pub use retry::RetryPolicy;
pub use state::{AlarmState, Claim};
