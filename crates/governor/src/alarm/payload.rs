//! What an alarm carries

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{duration_millis, NotifyRuleKind};
use crate::executor::{TaskId, TaskMeta};
use crate::stats::PoolStats;

/// Event-specific part of an alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerDetail {
    /// A submission was rejected
    Reject { task_id: TaskId },

    /// A task waited in the queue past the pool's queue timeout
    QueueTimeout {
        task_id: TaskId,
        #[serde(rename = "elapsedMs", with = "duration_millis")]
        elapsed: Duration,
    },

    /// Periodic sample of queue usage
    CapacityPressure {
        #[serde(rename = "queueUsagePercent")]
        queue_usage_percent: u64,
    },

    /// Periodic sample of busy workers against max size
    Liveness {
        #[serde(rename = "activePercent")]
        active_percent: u64,
    },
}

/// Input to [`AlarmEngine::evaluate`](super::AlarmEngine::evaluate)
#[derive(Debug, Clone)]
pub struct AlarmSample {
    pub stats: PoolStats,
    pub trigger: TriggerDetail,
    pub correlation_id: Option<String>,
}

impl AlarmSample {
    /// A rejected task
    pub fn rejected(stats: PoolStats, task: &TaskMeta) -> Self {
        Self {
            stats,
            trigger: TriggerDetail::Reject { task_id: task.id },
            correlation_id: task.context.correlation_id.clone(),
        }
    }

    /// A task that overstayed in the queue
    pub fn queue_timeout(
        stats: PoolStats,
        task_id: TaskId,
        elapsed: Duration,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            stats,
            trigger: TriggerDetail::QueueTimeout { task_id, elapsed },
            correlation_id,
        }
    }

    /// Queue usage sample
    pub fn capacity(stats: PoolStats) -> Self {
        let queue_usage_percent = stats.queue_usage_percent();
        Self {
            stats,
            trigger: TriggerDetail::CapacityPressure {
                queue_usage_percent,
            },
            correlation_id: None,
        }
    }

    /// Worker usage sample
    pub fn liveness(stats: PoolStats) -> Self {
        let active_percent = stats.active_percent();
        Self {
            stats,
            trigger: TriggerDetail::Liveness { active_percent },
            correlation_id: None,
        }
    }

    /// Value compared against a sampled rule's threshold
    pub(crate) fn percent_for(&self, kind: NotifyRuleKind) -> u64 {
        match kind {
            NotifyRuleKind::CapacityPressure => self.stats.queue_usage_percent(),
            NotifyRuleKind::Liveness => self.stats.active_percent(),
            NotifyRuleKind::Reject | NotifyRuleKind::QueueTimeout => 0,
        }
    }
}

/// Message handed to every notifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmPayload {
    pub pool_name: String,
    pub rule_kind: NotifyRuleKind,
    pub stats: PoolStats,
    pub trigger_detail: TriggerDetail,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AlarmPayload {
    pub(crate) fn from_sample(pool: &str, kind: NotifyRuleKind, sample: AlarmSample) -> Self {
        Self {
            pool_name: pool.to_string(),
            rule_kind: kind,
            stats: sample.stats,
            trigger_detail: sample.trigger,
            correlation_id: sample.correlation_id,
            timestamp: Utc::now(),
        }
    }
}
