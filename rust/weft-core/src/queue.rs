//! Per-worker task deque.
//!
//! Each worker owns one [`TaskQueue`]. The owner pushes and pops at the back
//! (LIFO, cache-friendly for fan-out patterns); foreign workers and the
//! scheduler's routing steal from the front (FIFO, taking the oldest work).
//!
//! This is intentionally a `Mutex<VecDeque>` rather than a lock-free
//! structure: the front end must be linearizable with the owner's back end,
//! and a single mutex gives that for free. A Chase–Lev deque can be swapped
//! in later if profiling shows contention on the steal path.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use crate::task::TaskRef;

/// Default queue capacity.
pub(crate) const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A bounded double-ended queue of task references.
///
/// Capacity is fixed at construction. Pushing beyond capacity is a
/// programming error (the graph is producing faster than it can ever drain)
/// and panics.
pub(crate) struct TaskQueue {
    inner: Mutex<VecDeque<TaskRef>>,
    capacity: usize,
}

impl TaskQueue {
    /// Create a queue with the default capacity.
    pub(crate) fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a queue bounded to `capacity` tasks.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "task queue capacity must be non-zero");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Push a task at the back.
    ///
    /// # Panics
    ///
    /// Panics if the queue is at capacity.
    pub(crate) fn push_back(&self, task: TaskRef) {
        let mut queue = self.inner.lock().unwrap();
        assert!(
            queue.len() < self.capacity,
            "task queue exceeded its capacity of {}",
            self.capacity
        );
        queue.push_back(task);
    }

    /// Pop the most recently pushed task (owner side).
    pub(crate) fn pop_back(&self) -> Option<TaskRef> {
        self.inner.lock().unwrap().pop_back()
    }

    /// Steal the oldest task (foreign side). Never blocks; returns `None`
    /// when the queue is empty.
    pub(crate) fn pop_front(&self) -> Option<TaskRef> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Drop every queued task. Used at shutdown.
    pub(crate) fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// Number of queued tasks.
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Whether the queue is empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use std::sync::Arc;

    fn task() -> TaskRef {
        Task::new(&[], Box::new(|| {}))
    }

    #[test]
    fn owner_side_is_lifo() {
        let queue = TaskQueue::new();
        let a = task();
        let b = task();
        queue.push_back(Arc::clone(&a));
        queue.push_back(Arc::clone(&b));

        assert!(Arc::ptr_eq(&queue.pop_back().unwrap(), &b));
        assert!(Arc::ptr_eq(&queue.pop_back().unwrap(), &a));
        assert!(queue.pop_back().is_none());
    }

    #[test]
    fn steal_side_is_fifo() {
        let queue = TaskQueue::new();
        let a = task();
        let b = task();
        queue.push_back(Arc::clone(&a));
        queue.push_back(Arc::clone(&b));

        assert!(Arc::ptr_eq(&queue.pop_front().unwrap(), &a));
        assert!(Arc::ptr_eq(&queue.pop_front().unwrap(), &b));
    }

    #[test]
    fn steal_from_empty_returns_none() {
        let queue = TaskQueue::new();
        assert!(queue.pop_front().is_none());
        assert!(queue.pop_back().is_none());
    }

    #[test]
    fn mixed_ends_share_one_range() {
        let queue = TaskQueue::new();
        let a = task();
        let b = task();
        let c = task();
        queue.push_back(Arc::clone(&a));
        queue.push_back(Arc::clone(&b));
        queue.push_back(Arc::clone(&c));

        assert!(Arc::ptr_eq(&queue.pop_front().unwrap(), &a));
        assert!(Arc::ptr_eq(&queue.pop_back().unwrap(), &c));
        assert!(Arc::ptr_eq(&queue.pop_back().unwrap(), &b));
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_drops_all_tasks() {
        let queue = TaskQueue::new();
        for _ in 0..5 {
            queue.push_back(task());
        }
        assert_eq!(queue.len(), 5);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    #[should_panic(expected = "exceeded its capacity")]
    fn push_beyond_capacity_panics() {
        let queue = TaskQueue::with_capacity(2);
        queue.push_back(task());
        queue.push_back(task());
        queue.push_back(task());
    }

    #[test]
    #[should_panic(expected = "must be non-zero")]
    fn zero_capacity_panics() {
        let _ = TaskQueue::with_capacity(0);
    }

    #[test]
    fn debug_format() {
        let queue = TaskQueue::with_capacity(8);
        queue.push_back(task());
        let dbg = format!("{:?}", queue);
        assert!(dbg.contains("len: 1"));
        assert!(dbg.contains("capacity: 8"));
    }
}
