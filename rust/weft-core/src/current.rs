//! The in-task scheduling API.
//!
//! While a task executes, the worker driving it is recorded in a
//! thread-local marker scoped to that worker's scheduler. The free functions
//! here resolve the marker and operate on the current worker's execution
//! context, so a running task can spawn children, declare continuations,
//! yield, reschedule, or fire off detached work without holding a scheduler
//! handle:
//!
//! ```no_run
//! # let scheduler = weft_core::Scheduler::with_workers(1).unwrap();
//! scheduler.detach_task(|| {
//!     let first = weft_core::current::emplace_task(&[], || println!("first"));
//!     weft_core::current::emplace_task(&[first], || println!("second"));
//! });
//! ```
//!
//! Calling any of these functions from a thread that is not a worker is a
//! programming error and panics.

use std::cell::RefCell;
use std::sync::Arc;

use crate::scheduler::Shared;
use crate::task::TaskRef;

struct CurrentWorker {
    shared: Arc<Shared>,
    index: usize,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentWorker>> = const { RefCell::new(None) };
}

/// Marks the calling thread as `shared`'s worker `index` for the lifetime of
/// the returned scope (cleared on drop, including unwinds).
pub(crate) fn enter(shared: &Arc<Shared>, index: usize) -> WorkerScope {
    CURRENT.with(|current| {
        let mut current = current.borrow_mut();
        debug_assert!(current.is_none(), "thread already runs a worker");
        *current = Some(CurrentWorker {
            shared: Arc::clone(shared),
            index,
        });
    });
    WorkerScope { _private: () }
}

pub(crate) struct WorkerScope {
    _private: (),
}

impl Drop for WorkerScope {
    fn drop(&mut self) {
        CURRENT.with(|current| current.borrow_mut().take());
    }
}

/// The calling thread's worker index, provided it belongs to `shared`'s
/// scheduler. A worker of a *different* scheduler does not count.
pub(crate) fn worker_index_for(shared: &Arc<Shared>) -> Option<usize> {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .and_then(|c| Arc::ptr_eq(&c.shared, shared).then_some(c.index))
    })
}

fn with_current<R>(op: &str, f: impl FnOnce(&CurrentWorker) -> R) -> R {
    CURRENT.with(|current| {
        let current = current.borrow();
        let current = current
            .as_ref()
            .unwrap_or_else(|| panic!("{} called outside a worker thread", op));
        f(current)
    })
}

/// Whether the calling thread is a scheduler worker.
pub fn is_worker_thread() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

/// Construct a task depending on `dependencies` in the current worker's
/// context. The task is parked until the current execution completes, then
/// released together with its siblings. Returns a handle usable as a
/// dependency of later tasks.
pub fn emplace_task<F>(dependencies: &[TaskRef], f: F) -> TaskRef
where
    F: FnMut() + Send + 'static,
{
    with_current("emplace_task", |c| {
        c.shared
            .worker(c.index)
            .context()
            .emplace_task(dependencies, Box::new(f))
    })
}

/// Like [`emplace_task`], and additionally register the task as a
/// continuation of the currently executing one: it inherits the current
/// task's successors and is driven directly by the same worker when ready.
pub fn emplace_task_continuation<F>(dependencies: &[TaskRef], f: F) -> TaskRef
where
    F: FnMut() + Send + 'static,
{
    with_current("emplace_task_continuation", |c| {
        c.shared
            .worker(c.index)
            .context()
            .emplace_task_continuation(dependencies, Box::new(f))
    })
}

/// Schedule the currently executing task again as a new task with the given
/// dependencies. Its successors are notified at the end of the current
/// execution; the re-run executes strictly after this invocation returns.
///
/// At most one reschedule or yield per execution; a second call panics.
pub fn reschedule_task(dependencies: &[TaskRef]) {
    with_current("reschedule_task", |c| {
        c.shared
            .worker(c.index)
            .context()
            .reschedule_task(dependencies)
    });
}

/// Schedule the currently executing task as a continuation of itself: it
/// keeps its successors and re-runs once `dependencies` resolve, strictly
/// after this invocation returns.
///
/// Same exclusion rules as [`reschedule_task`].
pub fn yield_task(dependencies: &[TaskRef]) {
    with_current("yield_task", |c| {
        c.shared.worker(c.index).context().yield_task(dependencies)
    });
}

/// Spawn a no-dependency, no-successor task on the current worker,
/// immediately eligible for execution.
pub fn detach_task<F>(f: F)
where
    F: FnMut() + Send + 'static,
{
    with_current("detach_task", |c| {
        c.shared.worker(c.index).detach(&c.shared, Box::new(f));
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
