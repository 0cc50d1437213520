//! The process-wide scheduler.
//!
//! A [`Scheduler`] owns one worker per eligible core (or an explicit count),
//! routes work between them when one starves, and exposes the public
//! task-spawn entry point. It is an explicit handle rather than a global
//! singleton: several schedulers can coexist (useful in tests), and the
//! thread-local current-worker marker is scoped to the scheduler that owns
//! the thread.
//!
//! # Routing
//!
//! Workers raise two signals the scheduler answers synchronously, under a
//! single routing mutex:
//!
//! * **starving** — the worker's queue ran dry. The scheduler scans the
//!   other workers in index order and steals the oldest task it finds;
//!   otherwise the worker is parked in the starving set.
//! * **enqueued** — a task landed on some worker's queue. If anyone is
//!   parked in the starving set, one parked worker is taken out (always
//!   removed *before* being fed) and the freshly enqueued task is rerouted
//!   to it. This is what spreads a burst produced by a single worker.
//!
//! Start-up is gated by a [`Latch`]: `Scheduler::new` returns only after
//! every worker has announced READY, and each worker holds at that latch
//! until the full party has arrived, so a steal can never target a worker
//! that has not finished initializing.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use weft_affinity::CoreSet;

use crate::current;
use crate::error::SchedulerError;
use crate::events::{EventTap, SchedulerEvent};
use crate::latch::Latch;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::worker::Worker;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Scheduler construction parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cores the scheduler may use; intersected with the process affinity
    /// mask. `None` means "everything the process is allowed".
    pub affinity: Option<CoreSet>,
    /// Number of workers to spawn. `None` spawns one per eligible core;
    /// an explicit count is clamped to at least 1 and pinned round-robin
    /// across the eligible cores.
    pub worker_count: Option<usize>,
    /// Per-worker queue capacity.
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            affinity: None,
            worker_count: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Routing {
    /// Workers waiting to be fed, oldest first. Each appears at most once.
    starving: VecDeque<usize>,
    /// xorshift32 state for spawn routing.
    rng: u32,
}

/// State shared between the scheduler handle and its worker threads.
pub(crate) struct Shared {
    workers: Vec<Worker>,
    routing: Mutex<Routing>,
    startup: Latch,
    completed: AtomicUsize,
    events: EventTap,
}

impl Shared {
    pub(crate) fn worker(&self, index: usize) -> &Worker {
        &self.workers[index]
    }

    pub(crate) fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub(crate) fn startup_latch(&self) -> &Latch {
        &self.startup
    }

    pub(crate) fn count_completed(&self) {
        self.completed.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn completed_count(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Simple deterministic pseudo-random number generator (xorshift32).
    ///
    /// We avoid pulling in a RNG crate for this single use case.
    fn xorshift32(state: &mut u32) -> u32 {
        let mut x = *state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        *state = x;
        x
    }

    /// Pick a worker index for externally spawned work.
    pub(crate) fn random_worker(&self) -> usize {
        let mut routing = self.routing.lock().unwrap();
        Self::xorshift32(&mut routing.rng) as usize % self.workers.len()
    }

    // -- worker signals ----------------------------------------------------

    /// READY announcement: one latch count per worker, exactly once.
    pub(crate) fn on_worker_ready(&self, index: usize) {
        self.events.emit(SchedulerEvent::WorkerReady { worker: index });
        self.startup.signal(false);
    }

    /// A task landed on `sender`'s queue: reroute it to a parked worker if
    /// anyone is starving.
    pub(crate) fn on_task_enqueued(&self, sender: usize) {
        self.events.emit(SchedulerEvent::TaskEnqueued { worker: sender });
        let mut routing = self.routing.lock().unwrap();
        let Some(hungry) = routing.starving.pop_front() else {
            return;
        };
        match self.workers[sender].dequeue_task() {
            // A worker is only ever taken out of the set together with a
            // feed (and its wake-up); when the sender *is* the parked
            // worker, the task cycles through its own queue and the feed
            // wakes it.
            Some(task) => {
                if hungry != sender {
                    self.events.emit(SchedulerEvent::TaskRerouted {
                        from: sender,
                        to: hungry,
                    });
                }
                self.workers[hungry].feed(task);
            }
            // The owner already drained the enqueued task; whoever was
            // popped is still hungry and goes back to the front.
            None => routing.starving.push_front(hungry),
        }
    }

    /// `index` ran dry: backfill from the first peer with queued work, or
    /// park the worker in the starving set.
    pub(crate) fn on_worker_starving(&self, index: usize) {
        self.events.emit(SchedulerEvent::WorkerStarving { worker: index });
        let mut routing = self.routing.lock().unwrap();
        for (victim, worker) in self.workers.iter().enumerate() {
            if victim == index {
                continue;
            }
            if let Some(task) = worker.dequeue_task() {
                self.events.emit(SchedulerEvent::TaskStolen {
                    from: victim,
                    to: index,
                });
                self.workers[index].feed(task);
                return;
            }
        }
        if !routing.starving.contains(&index) {
            routing.starving.push_back(index);
        }
    }

    #[cfg(test)]
    fn starving_len(&self) -> usize {
        self.routing.lock().unwrap().starving.len()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// A multi-worker, work-stealing task scheduler.
///
/// Dropping the scheduler stops and joins every worker; tasks still queued
/// at that point are dropped without running.
pub struct Scheduler {
    shared: Arc<Shared>,
    threads: Vec<thread::JoinHandle<()>>,
    cores: CoreSet,
}

impl Scheduler {
    /// Bring up a scheduler per `config`.
    ///
    /// Determines the eligible cores by intersecting the configured mask
    /// with the process affinity mask (an empty intersection is an error),
    /// spawns the workers, pins each to its core (pin failure is logged and
    /// ignored), and waits until every worker has announced READY.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let process_mask = weft_affinity::process_affinity().map_err(SchedulerError::Affinity)?;
        let cores = match &config.affinity {
            Some(mask) => mask.intersect(&process_mask),
            None => process_mask,
        };
        if cores.is_empty() {
            return Err(SchedulerError::NoEligibleCores);
        }
        let worker_count = config.worker_count.unwrap_or(cores.len()).max(1);

        let shared = Arc::new(Shared {
            workers: (0..worker_count)
                .map(|index| Worker::new(index, config.queue_capacity))
                .collect(),
            routing: Mutex::new(Routing {
                starving: VecDeque::new(),
                rng: 0x9E37_79B9,
            }),
            startup: Latch::new(worker_count),
            completed: AtomicUsize::new(0),
            events: EventTap::new(),
        });

        let core_list: Vec<usize> = cores.iter().collect();
        let mut threads = Vec::with_capacity(worker_count);
        let mut spawn_error = None;
        for index in 0..worker_count {
            let core = core_list[index % core_list.len()];
            let shared = Arc::clone(&shared);
            let builder = thread::Builder::new().name(format!("weft-worker-{}", index));
            let spawned = builder.spawn(move || {
                if !weft_affinity::pin_current_thread(core) {
                    log::warn!(
                        "worker {}: pinning to core {} failed; continuing unpinned",
                        index,
                        core
                    );
                }
                shared.worker(index).run(&shared);
            });
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    spawn_error = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = spawn_error {
            // Workers that never spawned cannot announce READY; sign the
            // latch on their behalf so the rendezvous resolves, then unwind
            // the ones that did start.
            for _ in threads.len()..worker_count {
                shared.startup_latch().signal(false);
            }
            for worker in shared.workers() {
                worker.stop();
            }
            for handle in threads {
                let _ = handle.join();
            }
            return Err(SchedulerError::WorkerSpawn(err));
        }

        shared.startup.wait();
        log::debug!(
            "scheduler started: {} workers on cores {}",
            worker_count,
            cores
        );
        Ok(Self {
            shared,
            threads,
            cores,
        })
    }

    /// Convenience constructor: `count` workers on whatever cores the
    /// process is allowed.
    pub fn with_workers(count: usize) -> Result<Self, SchedulerError> {
        Self::new(SchedulerConfig {
            worker_count: Some(count),
            ..SchedulerConfig::default()
        })
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }

    /// The cores the scheduler selected at start-up.
    pub fn cores(&self) -> &CoreSet {
        &self.cores
    }

    /// Fire-and-forget execution of `f` as a task with no dependencies and
    /// no successors.
    ///
    /// When the caller is one of this scheduler's workers the task lands on
    /// that worker; otherwise a worker is picked at random.
    pub fn detach_task<F>(&self, f: F)
    where
        F: FnMut() + Send + 'static,
    {
        let index = current::worker_index_for(&self.shared)
            .unwrap_or_else(|| self.shared.random_worker());
        self.shared.worker(index).detach(&self.shared, Box::new(f));
    }

    /// Open a subscription to the scheduler's diagnostic event stream.
    pub fn subscribe_events(&self) -> crossbeam_channel::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    /// Number of task executions completed so far, across all workers.
    pub fn completed_count(&self) -> usize {
        self.shared.completed_count()
    }

    /// Block until at least `expected` task executions have completed, or
    /// `timeout` elapses. Returns the completed count at the time the wait
    /// ended.
    pub fn wait_for_completion(&self, expected: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let current = self.shared.completed_count();
            if current >= expected || Instant::now() >= deadline {
                return current;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stop every worker at its next fetch boundary and join the threads.
    ///
    /// Tasks still queued are dropped without running. Idempotent.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        log::debug!("scheduler shutting down");
        for worker in self.shared.workers() {
            worker.stop();
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shutdown(&self) -> bool {
        self.threads.is_empty()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("worker_count", &self.worker_count())
            .field("cores", &self.cores)
            .field("completed_count", &self.completed_count())
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
