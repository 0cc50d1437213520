//! Per-worker execution context.
//!
//! The [`ExecutionContext`] is the workspace a running task produces more
//! work through: it collects the tasks created during the current execution
//! (`pending`), the subset that act as continuations of the current task,
//! and the handle that lets the current task reschedule or yield itself.
//!
//! Only the owning worker touches its context, and only between executions
//! or through the in-task API (see [`crate::current`]) while its own task
//! runs. The lists are drained after every execution: `pending` holds the
//! children of exactly one invocation at a time.

use std::sync::Arc;

use crate::task::{Callable, Task, TaskRef};

/// The per-worker workspace for in-task scheduling operations.
pub(crate) struct ExecutionContext {
    /// Tasks created by the current execution, awaiting dependency release.
    pending: Vec<TaskRef>,
    /// Continuations of the current task; always a subset of `pending`.
    continuations: Vec<TaskRef>,
    /// The currently executing task, until it reschedules or yields itself.
    reschedulable: Option<TaskRef>,
}

impl ExecutionContext {
    pub(crate) fn new() -> Self {
        Self {
            pending: Vec::new(),
            continuations: Vec::new(),
            reschedulable: None,
        }
    }

    /// Construct a task depending on `dependencies` and park it in the
    /// pending list. Returns a strong reference usable as a dependency of
    /// later tasks.
    pub(crate) fn emplace_task(
        &mut self,
        dependencies: &[TaskRef],
        callable: Callable,
    ) -> TaskRef {
        let task = Task::new(dependencies, callable);
        self.pending.push(Arc::clone(&task));
        task
    }

    /// Like [`emplace_task`](Self::emplace_task), and additionally mark the
    /// task as a continuation of the currently executing one.
    pub(crate) fn emplace_task_continuation(
        &mut self,
        dependencies: &[TaskRef],
        callable: Callable,
    ) -> TaskRef {
        let task = self.emplace_task(dependencies, callable);
        self.continuations.push(Arc::clone(&task));
        task
    }

    /// Schedule the currently executing task again as a new task with the
    /// given dependencies. Its successors are released at the end of this
    /// execution's completion; the re-run starts with a clean slate.
    ///
    /// # Panics
    ///
    /// Panics when called outside an execution or a second time within one
    /// (rescheduling and yielding are mutually exclusive, once per
    /// execution).
    pub(crate) fn reschedule_task(&mut self, dependencies: &[TaskRef]) {
        let task = self.take_reschedulable();
        task.set_dependencies(dependencies);
        self.pending.push(task);
    }

    /// Schedule the currently executing task as a continuation of itself:
    /// it keeps its successors and re-runs once `dependencies` resolve.
    ///
    /// # Panics
    ///
    /// Same rules as [`reschedule_task`](Self::reschedule_task).
    pub(crate) fn yield_task(&mut self, dependencies: &[TaskRef]) {
        let task = self.take_reschedulable();
        task.set_dependencies(dependencies);
        self.pending.push(Arc::clone(&task));
        self.continuations.push(task);
    }

    fn take_reschedulable(&mut self) -> TaskRef {
        self.reschedulable
            .take()
            .expect("task rescheduled twice (or outside an execution)")
    }

    /// Arm the reschedulable slot for the task about to execute.
    pub(crate) fn begin_execution(&mut self, task: &TaskRef) {
        debug_assert!(self.reschedulable.is_none());
        self.reschedulable = Some(Arc::clone(task));
    }

    /// Clear the slot after execution returns (no-op if the task already
    /// rescheduled or yielded itself).
    pub(crate) fn end_execution(&mut self) {
        self.reschedulable = None;
    }

    /// Take the last continuation of `completed`, transplanting the
    /// completed task's successors to it and removing it from the pending
    /// list — the worker will drive it directly instead of re-enqueuing.
    ///
    /// Returns `None` when the execution declared no continuation.
    pub(crate) fn get_continuation(&mut self, completed: &TaskRef) -> Option<TaskRef> {
        let continuation = self.continuations.pop()?;
        self.continuations.clear();
        completed.continue_with(&continuation);
        if let Some(position) = self
            .pending
            .iter()
            .position(|t| Arc::ptr_eq(t, &continuation))
        {
            self.pending.remove(position);
        }
        Some(continuation)
    }

    /// Release the scheduling guard of every remaining pending task.
    ///
    /// Returns the tasks that became ready; the rest stay parked in their
    /// dependencies' successor lists. The worker enqueues the ready ones
    /// (keeping one back as the fast-path task when it has no continuation
    /// to chain).
    pub(crate) fn schedule_pending_tasks(&mut self) -> Vec<TaskRef> {
        self.continuations.clear();
        let mut ready = Vec::new();
        for task in self.pending.drain(..) {
            if task.schedule_if_ready() {
                ready.push(task);
            }
        }
        ready
    }

    /// Number of tasks awaiting release. Diagnostics only.
    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
