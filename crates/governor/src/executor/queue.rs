//! Bounded FIFO work queue
//!
//! Not synchronized on its own: the owning pool guards it with the same
//! lock that tracks worker counts.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::task::Task;

/// Whether the queue capacity may change after construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Capacity fixed at construction
    Fixed,
    /// Capacity adjustable in place
    #[default]
    Resizable,
}

#[derive(Debug)]
pub(crate) struct TaskQueue {
    items: VecDeque<Task>,
    capacity: usize,
    kind: QueueKind,
}

impl TaskQueue {
    pub(crate) fn new(kind: QueueKind, capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
            kind,
        }
    }

    /// Append unless full; hands the task back otherwise
    pub(crate) fn offer(&mut self, task: Task) -> Result<(), Task> {
        if self.items.len() >= self.capacity {
            return Err(task);
        }
        self.items.push_back(task);
        Ok(())
    }

    pub(crate) fn poll(&mut self) -> Option<Task> {
        self.items.pop_front()
    }

    pub(crate) fn front(&self) -> Option<&Task> {
        self.items.front()
    }

    pub(crate) fn back(&self) -> Option<&Task> {
        self.items.back()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Task> {
        self.items.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.items.len())
    }

    pub(crate) fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Change capacity in place
    ///
    /// Queued tasks never move. Shrinking below the current length keeps
    /// every queued task; offers are refused until the queue drains below
    /// the new capacity. A fixed queue only accepts its current capacity.
    pub(crate) fn set_capacity(&mut self, capacity: usize) -> Result<(), usize> {
        if capacity == self.capacity {
            return Ok(());
        }
        match self.kind {
            QueueKind::Fixed => Err(self.capacity),
            QueueKind::Resizable => {
                self.capacity = capacity;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;

    fn task() -> Task {
        Task::new(TaskContext::new(), || {})
    }

    #[test]
    fn test_offer_respects_capacity() {
        let mut queue = TaskQueue::new(QueueKind::Fixed, 2);
        assert!(queue.offer(task()).is_ok());
        assert!(queue.offer(task()).is_ok());
        assert!(queue.offer(task()).is_err());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.remaining(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = TaskQueue::new(QueueKind::Resizable, 3);
        let ids: Vec<_> = (0..3)
            .map(|_| {
                let t = task();
                let id = t.id();
                queue.offer(t).unwrap();
                id
            })
            .collect();
        let polled: Vec<_> = std::iter::from_fn(|| queue.poll()).map(|t| t.id()).collect();
        assert_eq!(polled, ids);
    }

    #[test]
    fn test_fixed_queue_refuses_resize() {
        let mut queue = TaskQueue::new(QueueKind::Fixed, 100);
        assert_eq!(queue.set_capacity(50), Err(100));
        assert_eq!(queue.set_capacity(100), Ok(()));
        assert_eq!(queue.capacity(), 100);
    }

    #[test]
    fn test_resizable_shrink_keeps_tasks() {
        let mut queue = TaskQueue::new(QueueKind::Resizable, 5);
        for _ in 0..4 {
            queue.offer(task()).unwrap();
        }
        queue.set_capacity(2).unwrap();
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.remaining(), 0);
        assert!(queue.offer(task()).is_err());

        queue.poll();
        queue.poll();
        queue.poll();
        assert!(queue.offer(task()).is_ok());
    }
}
