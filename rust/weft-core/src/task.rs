//! Task nodes and the dependency/successor graph.
//!
//! A [`Task`] is a unit of deferred, non-blocking computation: a boxed
//! callable plus the bookkeeping that decides *when* it may run. Tasks are
//! shared via [`TaskRef`] (`Arc<Task>`); a task is kept alive by its
//! predecessors' successor lists and by whatever handles the creator retains,
//! and is destroyed when the last reference drops.
//!
//! # Readiness protocol
//!
//! A freshly wired task carries a dependency counter of
//! `|dependencies| + 1`. Each completing predecessor decrements it through
//! [`Task::schedule_if_ready`]; the trailing `+1` is a "not yet scheduled"
//! guard released by the scheduling machinery once graph construction is
//! done. Exactly one of those decrements observes the 1 → 0 transition, and
//! that caller — and only that caller — enqueues the task. This is what makes
//! "enqueued exactly once" hold without any queue-side deduplication.
//!
//! A dependency that already completed contributes nothing: registration
//! fails and the counter is credited immediately.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared handle to a task.
pub type TaskRef = Arc<Task>;

/// The erased callable a task runs. `FnMut` because a rescheduled or yielded
/// task re-runs the same callable.
pub(crate) type Callable = Box<dyn FnMut() + Send + 'static>;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Monotonically increasing counter used to mint unique [`TaskId`]s.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A unique, opaque identifier for a task, for logging and diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocate the next unique task ID.
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Return the raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Graph-side state, guarded together so that successor registration and
/// completion are mutually atomic.
struct TaskState {
    /// Tasks that depend on this one, in registration order.
    successors: Vec<TaskRef>,
    /// Set at completion notification; a completed task credits late
    /// registrations instead of holding them.
    completed: bool,
    /// Whether the task ever transitioned to ready (guards
    /// [`Task::set_dependencies`]).
    scheduled: bool,
}

/// A unit of deferred computation with a dependency list and successor list.
///
/// Constructed through the execution-context API ([`crate::current`]) or
/// [`crate::Scheduler::detach_task`]; external code only ever holds opaque
/// [`TaskRef`] handles to use as dependencies of later tasks.
pub struct Task {
    id: TaskId,
    /// Unmet dependencies plus the "not yet scheduled" guard.
    dependency_count: AtomicUsize,
    state: Mutex<TaskState>,
    /// `Option` so the executing worker can take the callable out while it
    /// runs and restore it afterwards (a rescheduled task runs it again).
    callable: Mutex<Option<Callable>>,
}

impl Task {
    /// Construct a task and wire it to `dependencies`.
    ///
    /// # Panics
    ///
    /// Panics if `dependencies` contains the task itself (enforced through
    /// [`set_dependencies`](Task::set_dependencies); a self-edge can only be
    /// expressed by replacing dependencies after construction, but the check
    /// holds everywhere).
    pub(crate) fn new(dependencies: &[TaskRef], callable: Callable) -> TaskRef {
        let task = Arc::new(Task {
            id: TaskId::next(),
            dependency_count: AtomicUsize::new(1),
            state: Mutex::new(TaskState {
                successors: Vec::new(),
                completed: false,
                scheduled: false,
            }),
            callable: Mutex::new(Some(callable)),
        });
        task.set_dependencies(dependencies);
        task
    }

    /// Replace the dependency list.
    ///
    /// The counter is re-armed to `|dependencies| + 1` and the task is
    /// registered as a successor of every dependency that has not yet
    /// completed; completed dependencies are credited on the spot.
    ///
    /// # Panics
    ///
    /// Panics if the task has pending dependencies and has already been
    /// scheduled (the graph is in flight), or on a self-dependency.
    pub(crate) fn set_dependencies(self: &TaskRef, dependencies: &[TaskRef]) {
        let count = self.dependency_count.load(Ordering::Acquire);
        {
            let mut state = self.state.lock().unwrap();
            assert!(
                count == 0 || !state.scheduled,
                "{}: dependencies replaced while the task is in flight",
                self.id
            );
            state.completed = false;
            state.scheduled = false;
        }

        // Publish the full count before registering anywhere, so a
        // dependency completing mid-loop decrements an armed counter. The
        // guard unit keeps the count above zero until release.
        self.dependency_count
            .store(dependencies.len() + 1, Ordering::Release);
        for dependency in dependencies {
            assert!(
                !Arc::ptr_eq(dependency, self),
                "{} cannot depend on itself",
                self.id
            );
            if !dependency.try_register_successor(self) {
                // Already completed: contributes 0 rather than 1.
                self.dependency_count.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Append `successor` to this task's successor list.
    ///
    /// Returns `false` when this task has already completed, in which case
    /// nothing was registered and the caller must credit the dependency.
    fn try_register_successor(&self, successor: &TaskRef) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.completed {
            return false;
        }
        state.successors.push(Arc::clone(successor));
        true
    }

    /// Atomically decrement the dependency counter.
    ///
    /// Returns `true` iff this call observed the 1 → 0 transition; the caller
    /// is then responsible for enqueuing the task exactly once.
    ///
    /// # Panics
    ///
    /// Panics if the counter is already zero.
    pub(crate) fn schedule_if_ready(&self) -> bool {
        let previous = self.dependency_count.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "{}: dependency counter underflow", self.id);
        if previous == 1 {
            self.state.lock().unwrap().scheduled = true;
            log::trace!("{} ready", self.id);
            true
        } else {
            false
        }
    }

    /// Invoke the callable.
    ///
    /// The callable is moved out for the duration of the call so the task's
    /// locks are never held across user code, and restored afterwards so a
    /// rescheduled task can run it again. If the callable panics it is
    /// dropped with the unwind; the panic surfaces to the caller.
    pub(crate) fn execute(&self) {
        let mut callable = self
            .callable
            .lock()
            .unwrap()
            .take()
            .expect("task executed while already running");
        callable();
        *self.callable.lock().unwrap() = Some(callable);
    }

    /// Completion notification: mark the task completed and drain its
    /// successor list for fan-out.
    ///
    /// A task that was re-armed during execution (rescheduled or yielded) is
    /// *not* completed — its counter is non-zero again — so its successors
    /// are retained for the later, final completion and an empty list is
    /// returned.
    pub(crate) fn complete(&self) -> Vec<TaskRef> {
        let mut state = self.state.lock().unwrap();
        if self.dependency_count.load(Ordering::Acquire) != 0 {
            return Vec::new();
        }
        state.completed = true;
        mem::take(&mut state.successors)
    }

    /// Move this task's successor list into `other`, clearing its own.
    ///
    /// Transplanting to itself (a yielded task is its own continuation) is a
    /// no-op: the successors stay put.
    pub(crate) fn continue_with(&self, other: &TaskRef) {
        if std::ptr::eq(self, Arc::as_ptr(other)) {
            return;
        }
        let mut drained = Vec::new();
        self.move_successors(&mut drained);
        if drained.is_empty() {
            return;
        }
        other.state.lock().unwrap().successors.extend(drained);
    }

    /// Drain the successor list into `out`, preserving registration order.
    pub(crate) fn move_successors(&self, out: &mut Vec<TaskRef>) {
        let mut state = self.state.lock().unwrap();
        out.append(&mut state.successors);
    }

    /// This task's unique ID.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether completion notification has run for this task.
    pub fn is_completed(&self) -> bool {
        self.state.lock().unwrap().completed
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Task")
            .field("id", &self.id)
            .field(
                "dependency_count",
                &self.dependency_count.load(Ordering::Relaxed),
            )
            .field("successors", &state.successors.len())
            .field("completed", &state.completed)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
