//! Governor error taxonomy
//!
//! Only configuration errors and submission outcomes surface to callers.
//! Hook failures and dispatch failures are contained where they happen; see
//! [`crate::aware::HookFailure`] and [`crate::alarm::DispatchError`].

use thiserror::Error;

use crate::executor::{ExecutorError, TaskId};

/// Errors returned by governance operations
#[derive(Debug, Error)]
pub enum GovernorError {
    /// Parameter validation failed; the pool was left untouched
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// The pool's queue cannot change capacity; the pool was left untouched
    #[error("queue of pool {pool} cannot be resized from {current} to {requested}")]
    UnsupportedResize {
        pool: String,
        current: usize,
        requested: usize,
    },

    /// No pool registered under this name
    #[error("pool not found: {0}")]
    PoolNotFound(String),

    /// A pool with this name is already registered
    #[error("pool already registered: {0}")]
    DuplicatePool(String),

    /// The task was refused by an abort saturation policy
    #[error("task {task_id} rejected by pool {pool}")]
    Rejected { pool: String, task_id: TaskId },

    /// The pool no longer accepts tasks
    #[error("pool {0} is shut down")]
    Shutdown(String),

    /// Constructed outside a tokio runtime without an explicit handle
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}

impl From<ExecutorError> for GovernorError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Rejected { pool, task_id } => Self::Rejected { pool, task_id },
            ExecutorError::Shutdown(pool) => Self::Shutdown(pool),
            ExecutorError::InvalidSize(reason) => Self::InvalidConfig(reason),
            ExecutorError::UnsupportedResize {
                pool,
                current,
                requested,
            } => Self::UnsupportedResize {
                pool,
                current,
                requested,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_error_mapping() {
        let err: GovernorError = ExecutorError::UnsupportedResize {
            pool: "io".into(),
            current: 100,
            requested: 50,
        }
        .into();
        assert!(matches!(
            err,
            GovernorError::UnsupportedResize {
                current: 100,
                requested: 50,
                ..
            }
        ));

        let err: GovernorError = ExecutorError::InvalidSize("core > max".into()).into();
        assert!(matches!(err, GovernorError::InvalidConfig(_)));
    }

    #[test]
    fn test_error_display() {
        let err = GovernorError::PoolNotFound("io-pool".into());
        assert_eq!(err.to_string(), "pool not found: io-pool");
    }
}
