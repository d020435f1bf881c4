//! Unit of work accepted by a pool

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::TaskContext;

/// Time-ordered task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything about a task except its body
#[derive(Debug, Clone)]
pub struct TaskMeta {
    pub id: TaskId,
    pub context: TaskContext,
    pub submitted_at: Instant,
}

/// How a task body finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// The body panicked; carries the panic message when it was a string
    Panicked(String),
}

type TaskBody = Box<dyn FnOnce() + Send + 'static>;

/// A submitted closure plus its identity
pub struct Task {
    meta: TaskMeta,
    body: TaskBody,
}

impl Task {
    pub fn new<F>(context: TaskContext, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            meta: TaskMeta {
                id: TaskId::new(),
                context,
                submitted_at: Instant::now(),
            },
            body: Box::new(body),
        }
    }

    pub fn id(&self) -> TaskId {
        self.meta.id
    }

    pub fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    /// Run the body, containing any panic
    pub fn run(self) -> (TaskMeta, TaskOutcome) {
        let Task { meta, body } = self;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(()) => TaskOutcome::Completed,
            Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
        };
        (meta, outcome)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("meta", &self.meta).finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
