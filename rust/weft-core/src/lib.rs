//! Weft — a multi-worker, work-stealing task scheduler.
//!
//! Weft dispatches fine-grained, non-blocking tasks with user-declared
//! dependency graphs. A [`Scheduler`] owns one worker thread per eligible
//! core (pinned when the platform allows it); each worker runs tasks LIFO
//! from its own queue, and idle workers steal the oldest work from their
//! peers, arbitrated by the scheduler's starvation routing.
//!
//! External code spawns work with [`Scheduler::detach_task`]. Inside a
//! running task, the [`current`] module provides the full graph-building
//! API: spawn children with dependencies, declare continuations that inherit
//! the current task's successors, or reschedule/yield the current task
//! against fresh dependencies.
//!
//! ```no_run
//! use weft_core::{current, Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
//! scheduler.detach_task(|| {
//!     let load = current::emplace_task(&[], || println!("load"));
//!     let transform = current::emplace_task(&[load], || println!("transform"));
//!     current::emplace_task(&[transform], || println!("store"));
//! });
//! ```
//!
//! Tasks must not block: a worker parks only when its queue is empty and no
//! steal succeeded. There is no preemption, no priorities, and no per-task
//! cancellation — `Scheduler::shutdown` stops workers at their next fetch
//! boundary and drops whatever is still queued.

mod context;
mod queue;
mod worker;

pub mod current;
pub mod error;
pub mod events;
pub mod latch;
pub mod scheduler;
pub mod task;

pub use error::SchedulerError;
pub use events::SchedulerEvent;
pub use latch::Latch;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use task::{Task, TaskId, TaskRef};
