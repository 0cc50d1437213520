//! Observable scheduler events.
//!
//! The scheduler mirrors its lifecycle and routing decisions onto a
//! diagnostic channel: worker readiness, enqueues, starvation, and the two
//! stealing paths. Subscribers receive a best-effort stream — events are
//! dropped once every receiver is gone, and nothing in the scheduler ever
//! blocks on a subscriber.
//!
//! Tests use the tap to observe behaviour that is otherwise invisible from
//! the public API (e.g. that work stealing actually happened).

use std::fmt;
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// A scheduler lifecycle or routing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A worker finished initializing and entered its run loop.
    WorkerReady { worker: usize },
    /// A task was pushed onto a worker's queue.
    TaskEnqueued { worker: usize },
    /// A worker found its queue empty and asked the scheduler for work.
    WorkerStarving { worker: usize },
    /// Starvation backfill: a task moved from `from`'s queue to `to`.
    TaskStolen { from: usize, to: usize },
    /// Burst redistribution: an enqueue on `from` was rerouted to the
    /// starving worker `to`.
    TaskRerouted { from: usize, to: usize },
}

impl fmt::Display for SchedulerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerEvent::WorkerReady { worker } => write!(f, "worker {} ready", worker),
            SchedulerEvent::TaskEnqueued { worker } => write!(f, "enqueued on worker {}", worker),
            SchedulerEvent::WorkerStarving { worker } => write!(f, "worker {} starving", worker),
            SchedulerEvent::TaskStolen { from, to } => {
                write!(f, "stolen from worker {} for worker {}", from, to)
            }
            SchedulerEvent::TaskRerouted { from, to } => {
                write!(f, "rerouted from worker {} to worker {}", from, to)
            }
        }
    }
}

/// Fan-out point for [`SchedulerEvent`]s.
///
/// Holds one sender per subscriber; senders whose receiver hung up are
/// pruned on the next emit.
pub(crate) struct EventTap {
    subscribers: Mutex<Vec<Sender<SchedulerEvent>>>,
}

impl EventTap {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Open a new subscription.
    pub(crate) fn subscribe(&self) -> Receiver<SchedulerEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }

    /// Broadcast `event` to every live subscriber.
    pub(crate) fn emit(&self, event: SchedulerEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|s| s.send(event).is_ok());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_receives_events() {
        let tap = EventTap::new();
        let rx = tap.subscribe();
        tap.emit(SchedulerEvent::WorkerReady { worker: 0 });
        tap.emit(SchedulerEvent::TaskEnqueued { worker: 1 });

        assert_eq!(rx.recv().unwrap(), SchedulerEvent::WorkerReady { worker: 0 });
        assert_eq!(rx.recv().unwrap(), SchedulerEvent::TaskEnqueued { worker: 1 });
    }

    #[test]
    fn multiple_subscribers_see_the_same_stream() {
        let tap = EventTap::new();
        let rx1 = tap.subscribe();
        let rx2 = tap.subscribe();
        tap.emit(SchedulerEvent::WorkerStarving { worker: 2 });

        assert_eq!(rx1.recv().unwrap(), SchedulerEvent::WorkerStarving { worker: 2 });
        assert_eq!(rx2.recv().unwrap(), SchedulerEvent::WorkerStarving { worker: 2 });
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let tap = EventTap::new();
        let rx = tap.subscribe();
        drop(rx);
        // Must not panic or accumulate dead senders.
        tap.emit(SchedulerEvent::TaskStolen { from: 0, to: 1 });
        assert!(tap.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let tap = EventTap::new();
        tap.emit(SchedulerEvent::TaskRerouted { from: 1, to: 0 });
    }

    #[test]
    fn display_formats() {
        assert_eq!(
            SchedulerEvent::TaskStolen { from: 3, to: 1 }.to_string(),
            "stolen from worker 3 for worker 1"
        );
        assert_eq!(
            SchedulerEvent::WorkerReady { worker: 0 }.to_string(),
            "worker 0 ready"
        );
    }
}
