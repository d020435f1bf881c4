//! Alarm delivery backends

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use super::payload::AlarmPayload;

/// Delivery failure of one notifier
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The backend could not be reached; worth retrying
    #[error("notifier unavailable: {0}")]
    Unavailable(String),

    /// The backend is gone for good
    #[error("notifier closed")]
    Closed,

    #[error("failed to encode alarm: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// An alarm sink
///
/// Called from the notification path on the async runtime, never from a
/// task submitter or worker.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn notify(&self, recipients: &[String], payload: &AlarmPayload)
        -> Result<(), DispatchError>;
}

/// Writes every alarm as a structured warn event
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(
        &self,
        recipients: &[String],
        payload: &AlarmPayload,
    ) -> Result<(), DispatchError> {
        let detail = serde_json::to_string(&payload.trigger_detail)?;
        warn!(
            pool = %payload.pool_name,
            rule = %payload.rule_kind,
            recipients = ?recipients,
            correlation_id = ?payload.correlation_id,
            pool_size = payload.stats.pool_size,
            active_count = payload.stats.active_count,
            queue_size = payload.stats.queue_size,
            queue_capacity = payload.stats.queue_capacity,
            reject_count = payload.stats.reject_count,
            detail = %detail,
            "pool alarm"
        );
        Ok(())
    }
}

/// An alarm as received from a [`ChannelNotifier`]
#[derive(Debug, Clone)]
pub struct DeliveredAlarm {
    pub recipients: Vec<String>,
    pub payload: AlarmPayload,
}

/// Forwards alarms into a tokio channel
pub struct ChannelNotifier {
    tx: mpsc::Sender<DeliveredAlarm>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its channel
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<DeliveredAlarm>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    fn name(&self) -> &str {
        "channel"
    }

    async fn notify(
        &self,
        recipients: &[String],
        payload: &AlarmPayload,
    ) -> Result<(), DispatchError> {
        self.tx
            .send(DeliveredAlarm {
                recipients: recipients.to_vec(),
                payload: payload.clone(),
            })
            .await
            .map_err(|_| DispatchError::Closed)
    }
}
