//! Periodic capacity and liveness sampling

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::alarm::{AlarmEngine, AlarmSample};
use crate::config::{NotifyRuleKind, MIN_MONITOR_INTERVAL};
use crate::handle::PoolHandle;

/// Running sampler loop; stops when stopped or dropped
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop the loop and wait for it to exit
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "monitor loop ended abnormally");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub(crate) fn spawn(
    runtime: &Handle,
    interval: Duration,
    pools: Arc<DashMap<String, Arc<PoolHandle>>>,
    engine: Arc<AlarmEngine>,
) -> MonitorHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Settings can arrive deserialized, bypassing the builder clamp
    let interval = if interval < MIN_MONITOR_INTERVAL {
        warn!(
            requested_ms = interval.as_millis() as u64,
            "monitor interval too small, using minimum"
        );
        MIN_MONITOR_INTERVAL
    } else {
        interval
    };

    let task = runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => sample(&pools, &engine),
                _ = shutdown_rx.changed() => {
                    debug!("Monitor loop: shutdown requested");
                    break;
                }
            }
        }

        debug!("Monitor loop exited");
    });

    MonitorHandle {
        shutdown_tx,
        task: Some(task),
    }
}

/// Take one sample of every registered pool
pub(crate) fn sample(pools: &DashMap<String, Arc<PoolHandle>>, engine: &AlarmEngine) {
    let handles: Vec<Arc<PoolHandle>> = pools.iter().map(|e| Arc::clone(e.value())).collect();

    for handle in handles {
        let stats = handle.stats();
        debug!(
            pool = %stats.pool_name,
            pool_size = stats.pool_size,
            active_count = stats.active_count,
            queue_size = stats.queue_size,
            queue_capacity = stats.queue_capacity,
            completed = stats.completed_task_count,
            rejected = stats.reject_count,
            "pool sample"
        );
        if stats.is_shutdown {
            continue;
        }

        engine.evaluate(
            handle.name(),
            NotifyRuleKind::CapacityPressure,
            AlarmSample::capacity(stats.clone()),
        );
        engine.evaluate(
            handle.name(),
            NotifyRuleKind::Liveness,
            AlarmSample::liveness(stats),
        );
    }
}
