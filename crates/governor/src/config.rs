//! Pool parameters, notify rules and governor settings
//!
//! Everything here is plain data: serializable, cloneable, validated on
//! demand. Live application of these values belongs to
//! [`crate::reconfig::ReconfigurationController`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alarm::RetryPolicy;
use crate::error::GovernorError;

/// Action taken when both worker and queue capacity are exhausted
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// Refuse the task and report the rejection to the submitter
    #[default]
    Abort,
    /// Silently drop the task
    Discard,
    /// Drop the oldest queued task and retry the submission
    DiscardOldest,
    /// Run the task on the submitting thread
    CallerRuns,
    /// Delegate to a custom action registered under this name
    Custom(String),
}

impl fmt::Display for SaturationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Discard => write!(f, "discard"),
            Self::DiscardOldest => write!(f, "discard_oldest"),
            Self::CallerRuns => write!(f, "caller_runs"),
            Self::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// Tunable parameters of one governed pool
///
/// # Example
///
/// ```
/// use poolwarden_governor::{PoolParams, SaturationPolicy};
/// use std::time::Duration;
///
/// let params = PoolParams::new(2, 4, 10)
///     .with_keep_alive(Duration::from_secs(30))
///     .with_saturation_policy(SaturationPolicy::CallerRuns);
/// assert!(params.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolParams {
    /// Threads kept alive even when idle
    pub core_size: usize,

    /// Upper bound on threads
    pub max_size: usize,

    /// Bounded queue capacity
    pub queue_capacity: usize,

    /// Idle time after which threads above core exit
    #[serde(rename = "keepAliveMs", with = "duration_millis")]
    pub keep_alive: Duration,

    /// What to do when the pool is saturated
    #[serde(default)]
    pub saturation_policy: SaturationPolicy,

    /// Queue wait after which a queue-timeout event fires (None = not watched)
    #[serde(
        rename = "queueTimeoutMs",
        default,
        with = "option_duration_millis"
    )]
    pub queue_timeout: Option<Duration>,

    /// Let core threads time out like non-core ones
    #[serde(default)]
    pub allow_core_timeout: bool,
}

impl Default for PoolParams {
    fn default() -> Self {
        Self {
            core_size: 1,
            max_size: 4,
            queue_capacity: 1024,
            keep_alive: Duration::from_secs(60),
            saturation_policy: SaturationPolicy::Abort,
            queue_timeout: None,
            allow_core_timeout: false,
        }
    }
}

impl PoolParams {
    /// Create parameters with the given sizes and default everything else
    pub fn new(core_size: usize, max_size: usize, queue_capacity: usize) -> Self {
        Self {
            core_size,
            max_size,
            queue_capacity,
            ..Default::default()
        }
    }

    /// Set the keep-alive duration
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the saturation policy
    pub fn with_saturation_policy(mut self, policy: SaturationPolicy) -> Self {
        self.saturation_policy = policy;
        self
    }

    /// Watch queued tasks and report those waiting longer than `timeout`
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = Some(timeout);
        self
    }

    /// Allow core threads to time out
    pub fn with_allow_core_timeout(mut self, allow: bool) -> Self {
        self.allow_core_timeout = allow;
        self
    }

    /// Check the size invariants
    ///
    /// Sizes are unsigned, so the remaining rules are `max >= 1` and
    /// `max >= core`.
    pub fn validate(&self) -> Result<(), GovernorError> {
        if self.max_size == 0 {
            return Err(GovernorError::InvalidConfig(
                "max_size must be at least 1".into(),
            ));
        }
        if self.core_size > self.max_size {
            return Err(GovernorError::InvalidConfig(format!(
                "core_size {} exceeds max_size {}",
                self.core_size, self.max_size
            )));
        }
        if self.keep_alive.is_zero() && self.allow_core_timeout {
            return Err(GovernorError::InvalidConfig(
                "allow_core_timeout requires a non-zero keep_alive".into(),
            ));
        }
        Ok(())
    }

    /// Describe every field that differs from `other` as `field: old => new`
    pub fn diff(&self, other: &PoolParams) -> Vec<String> {
        let mut changes = Vec::new();
        if self.core_size != other.core_size {
            changes.push(format!("core_size: {} => {}", self.core_size, other.core_size));
        }
        if self.max_size != other.max_size {
            changes.push(format!("max_size: {} => {}", self.max_size, other.max_size));
        }
        if self.queue_capacity != other.queue_capacity {
            changes.push(format!(
                "queue_capacity: {} => {}",
                self.queue_capacity, other.queue_capacity
            ));
        }
        if self.keep_alive != other.keep_alive {
            changes.push(format!(
                "keep_alive: {:?} => {:?}",
                self.keep_alive, other.keep_alive
            ));
        }
        if self.saturation_policy != other.saturation_policy {
            changes.push(format!(
                "saturation_policy: {} => {}",
                self.saturation_policy, other.saturation_policy
            ));
        }
        if self.queue_timeout != other.queue_timeout {
            changes.push(format!(
                "queue_timeout: {:?} => {:?}",
                self.queue_timeout, other.queue_timeout
            ));
        }
        if self.allow_core_timeout != other.allow_core_timeout {
            changes.push(format!(
                "allow_core_timeout: {} => {}",
                self.allow_core_timeout, other.allow_core_timeout
            ));
        }
        changes
    }
}

/// Alarm rule kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotifyRuleKind {
    /// Rejected submissions
    Reject,
    /// Tasks that waited in the queue past the pool's queue timeout
    QueueTimeout,
    /// Queue usage percent
    CapacityPressure,
    /// Busy worker percent against max size
    Liveness,
}

impl NotifyRuleKind {
    /// Every kind, in evaluation order
    pub const ALL: [NotifyRuleKind; 4] = [
        Self::Reject,
        Self::QueueTimeout,
        Self::CapacityPressure,
        Self::Liveness,
    ];

    /// Whether the threshold counts events (as opposed to a sampled percent)
    pub fn is_counted(self) -> bool {
        matches!(self, Self::Reject | Self::QueueTimeout)
    }
}

impl fmt::Display for NotifyRuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reject => write!(f, "REJECT"),
            Self::QueueTimeout => write!(f, "QUEUE_TIMEOUT"),
            Self::CapacityPressure => write!(f, "CAPACITY_PRESSURE"),
            Self::Liveness => write!(f, "LIVENESS"),
        }
    }
}

/// One alarm rule of a pool
///
/// For counted kinds the threshold is a number of events since the last
/// dispatch; for sampled kinds it is a percentage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRule {
    pub kind: NotifyRuleKind,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub threshold: u64,

    /// Minimum interval between two dispatches of this rule
    #[serde(rename = "cooldownMs", with = "duration_millis")]
    pub cooldown: Duration,

    #[serde(default)]
    pub recipients: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl NotifyRule {
    /// Rule with the default threshold and a 120s cooldown
    pub fn new(kind: NotifyRuleKind) -> Self {
        let threshold = match kind {
            NotifyRuleKind::Reject | NotifyRuleKind::QueueTimeout => 1,
            NotifyRuleKind::CapacityPressure | NotifyRuleKind::Liveness => 80,
        };
        Self {
            kind,
            enabled: true,
            threshold,
            cooldown: Duration::from_secs(120),
            recipients: vec![],
        }
    }

    /// One enabled rule per kind
    pub fn defaults() -> Vec<NotifyRule> {
        NotifyRuleKind::ALL.into_iter().map(Self::new).collect()
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients = recipients.into_iter().map(Into::into).collect();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Smallest sampling period the monitor accepts
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(1);

/// Process-level governor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorSettings {
    /// Interval between capacity/liveness samples
    #[serde(with = "duration_millis")]
    pub monitor_interval: Duration,

    /// Retry policy for failed alarm dispatches
    pub dispatch_retry: RetryPolicy,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(5),
            dispatch_retry: RetryPolicy::exponential()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(5)),
        }
    }
}

impl GovernorSettings {
    /// Create settings from environment variables
    ///
    /// - `POOLWARDEN_MONITOR_INTERVAL_MS` (default 5000)
    /// - `POOLWARDEN_DISPATCH_MAX_ATTEMPTS` (default 3)
    /// - `POOLWARDEN_DISPATCH_INITIAL_BACKOFF_MS` (default 500)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let monitor_interval = std::env::var("POOLWARDEN_MONITOR_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.monitor_interval);

        let mut dispatch_retry = defaults.dispatch_retry;
        if let Some(attempts) = std::env::var("POOLWARDEN_DISPATCH_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            dispatch_retry = dispatch_retry.with_max_attempts(attempts);
        }
        if let Some(backoff) = std::env::var("POOLWARDEN_DISPATCH_INITIAL_BACKOFF_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            dispatch_retry = dispatch_retry.with_base_delay(Duration::from_millis(backoff));
        }

        Self {
            monitor_interval,
            dispatch_retry,
        }
    }

    /// Set the monitor interval, at least [`MIN_MONITOR_INTERVAL`]
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval.max(MIN_MONITOR_INTERVAL);
        self
    }

    /// Set the dispatch retry policy
    pub fn with_dispatch_retry(mut self, policy: RetryPolicy) -> Self {
        self.dispatch_retry = policy;
        self
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration> as milliseconds
pub(crate) mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
