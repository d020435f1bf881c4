//! Point-in-time pool statistics

use serde::{Deserialize, Serialize};

/// Immutable snapshot of one pool
///
/// Produced on demand; consistent as of the call but not transactional with
/// respect to concurrent submissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub pool_name: String,
    pub pool_size: usize,
    pub active_count: usize,
    pub core_size: usize,
    pub max_size: usize,
    pub largest_pool_size: usize,
    pub task_count: u64,
    pub completed_task_count: u64,
    pub queue_capacity: usize,
    pub queue_size: usize,
    pub queue_remaining_capacity: usize,
    pub reject_count: u64,
    pub is_shutdown: bool,
    pub is_terminated: bool,
    pub is_terminating: bool,
}

impl PoolStats {
    /// Queue usage in percent (100 for a zero-capacity queue holding tasks)
    pub fn queue_usage_percent(&self) -> u64 {
        percent(self.queue_size, self.queue_capacity)
    }

    /// Busy workers in percent of max size
    pub fn active_percent(&self) -> u64 {
        percent(self.active_count, self.max_size)
    }
}

fn percent(part: usize, whole: usize) -> u64 {
    if whole == 0 {
        return if part > 0 { 100 } else { 0 };
    }
    (part as u64 * 100) / whole as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_percentages() {
        let stats = PoolStats {
            queue_capacity: 50,
            queue_size: 40,
            active_count: 3,
            max_size: 4,
            ..Default::default()
        };
        assert_eq!(stats.queue_usage_percent(), 80);
        assert_eq!(stats.active_percent(), 75);
    }

    #[test]
    fn test_zero_capacity_percent() {
        let empty = PoolStats::default();
        assert_eq!(empty.queue_usage_percent(), 0);
        assert_eq!(empty.active_percent(), 0);
    }

    #[test]
    fn test_wire_names() {
        let stats = PoolStats {
            pool_name: "io-pool".into(),
            is_terminating: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["poolName"], "io-pool");
        assert_eq!(json["queueRemainingCapacity"], 0);
        assert_eq!(json["isTerminating"], true);
        assert_eq!(json["largestPoolSize"], 0);
    }
}
