//! Request context carried explicitly through submit, reject and alarm paths

use serde::{Deserialize, Serialize};

/// Per-task context
///
/// Replaces ambient trace ids: whatever the submitter knows about the
/// originating request travels with the task and ends up in alarm payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Correlation id of the originating request, if any
    pub correlation_id: Option<String>,
}

impl TaskContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the correlation id
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}
