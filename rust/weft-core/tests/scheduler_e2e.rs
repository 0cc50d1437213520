//! End-to-end scheduler behaviour: dependency ordering, continuations,
//! stealing, rescheduling, start-up and shutdown semantics.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use weft_core::{current, Scheduler, SchedulerConfig, SchedulerEvent};

/// Probe that counts drops, for verifying queued tasks are destroyed
/// exactly once at shutdown.
struct DropProbe {
    drops: Arc<AtomicUsize>,
}

impl Drop for DropProbe {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn fan_out_fan_in_respects_dependency_order() {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut scheduler = Scheduler::with_workers(2).unwrap();

    let spawner_order = Arc::clone(&order);
    scheduler.detach_task(move || {
        let o = Arc::clone(&spawner_order);
        let root = current::emplace_task(&[], move || o.lock().unwrap().push("r"));
        let o = Arc::clone(&spawner_order);
        let a = current::emplace_task(&[Arc::clone(&root)], move || o.lock().unwrap().push("a"));
        let o = Arc::clone(&spawner_order);
        let b = current::emplace_task(&[root], move || o.lock().unwrap().push("b"));
        let o = Arc::clone(&spawner_order);
        current::emplace_task(&[a, b], move || o.lock().unwrap().push("e"));
    });

    // spawner + root + a + b + end
    let completed = scheduler.wait_for_completion(5, Duration::from_secs(5));
    scheduler.shutdown();
    assert_eq!(completed, 5);

    let order = order.lock().unwrap();
    assert_eq!(order.len(), 4, "every task ran exactly once: {:?}", *order);
    assert_eq!(order[0], "r");
    assert_eq!(order[3], "e");
    let middle: HashSet<_> = [order[1], order[2]].into();
    assert_eq!(middle, HashSet::from(["a", "b"]));
}

#[test]
fn continuation_chains_on_the_same_worker_without_requeue() {
    let mut scheduler = Scheduler::with_workers(1).unwrap();
    let events = scheduler.subscribe_events();

    let first_thread = Arc::new(Mutex::new(None));
    let second_thread = Arc::new(Mutex::new(None));

    let ft = Arc::clone(&first_thread);
    let st = Arc::clone(&second_thread);
    scheduler.detach_task(move || {
        *ft.lock().unwrap() = Some(thread::current().id());
        let st = Arc::clone(&st);
        current::emplace_task_continuation(&[], move || {
            *st.lock().unwrap() = Some(thread::current().id());
        });
    });

    let completed = scheduler.wait_for_completion(2, Duration::from_secs(5));
    scheduler.shutdown();
    assert_eq!(completed, 2);

    let first = first_thread.lock().unwrap().expect("first task ran");
    let second = second_thread.lock().unwrap().expect("continuation ran");
    assert_eq!(first, second, "continuation stayed on its worker");

    // The only enqueue is the detached task itself: the continuation was
    // chained directly, never passing through the queue.
    let enqueues = events
        .try_iter()
        .filter(|e| matches!(e, SchedulerEvent::TaskEnqueued { .. }))
        .count();
    assert_eq!(enqueues, 1);
}

#[test]
fn idle_worker_steals_from_a_loaded_peer() {
    let mut scheduler = Scheduler::with_workers(2).unwrap();
    let events = scheduler.subscribe_events();

    let threads_seen: Arc<Mutex<HashSet<thread::ThreadId>>> =
        Arc::new(Mutex::new(HashSet::new()));

    // A single detached task floods its own worker with children; the other
    // worker starts idle and must end up with some of them.
    let seen = Arc::clone(&threads_seen);
    scheduler.detach_task(move || {
        for _ in 0..100 {
            let seen = Arc::clone(&seen);
            current::emplace_task(&[], move || {
                seen.lock().unwrap().insert(thread::current().id());
                thread::sleep(Duration::from_micros(200));
            });
        }
    });

    let completed = scheduler.wait_for_completion(101, Duration::from_secs(10));
    scheduler.shutdown();
    assert_eq!(completed, 101);

    assert_eq!(
        threads_seen.lock().unwrap().len(),
        2,
        "both workers executed part of the burst"
    );
    let moved = events.try_iter().any(|e| {
        matches!(
            e,
            SchedulerEvent::TaskStolen { .. } | SchedulerEvent::TaskRerouted { .. }
        )
    });
    assert!(moved, "at least one task changed workers");
}

#[test]
fn rescheduled_task_runs_again_strictly_after_its_gate() {
    let mut scheduler = Scheduler::with_workers(2).unwrap();

    let executions = Arc::new(AtomicUsize::new(0));
    let gate_done = Arc::new(AtomicBool::new(false));
    let second_saw_gate = Arc::new(AtomicBool::new(false));

    let execs = Arc::clone(&executions);
    let gate_flag = Arc::clone(&gate_done);
    let saw = Arc::clone(&second_saw_gate);
    scheduler.detach_task(move || {
        if execs.fetch_add(1, Ordering::SeqCst) == 0 {
            let gate_flag = Arc::clone(&gate_flag);
            let gate = current::emplace_task(&[], move || {
                thread::sleep(Duration::from_millis(50));
                gate_flag.store(true, Ordering::SeqCst);
            });
            current::reschedule_task(&[gate]);
        } else {
            saw.store(gate_done.load(Ordering::SeqCst), Ordering::SeqCst);
        }
    });

    // two runs of the task plus the gate
    let completed = scheduler.wait_for_completion(3, Duration::from_secs(5));
    scheduler.shutdown();
    assert_eq!(completed, 3);

    assert_eq!(executions.load(Ordering::SeqCst), 2);
    assert!(
        second_saw_gate.load(Ordering::SeqCst),
        "second execution observed the completed gate"
    );
}

#[test]
fn yielded_task_keeps_its_successors() {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut scheduler = Scheduler::with_workers(1).unwrap();

    let spawner_order = Arc::clone(&order);
    scheduler.detach_task(move || {
        let runs = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&spawner_order);
        let yielder = current::emplace_task(&[], move || {
            if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                o.lock().unwrap().push("y1");
                current::yield_task(&[]);
            } else {
                o.lock().unwrap().push("y2");
            }
        });
        let o = Arc::clone(&spawner_order);
        current::emplace_task(&[yielder], move || o.lock().unwrap().push("s"));
    });

    // spawner + two runs of the yielder + the successor
    let completed = scheduler.wait_for_completion(4, Duration::from_secs(5));
    scheduler.shutdown();
    assert_eq!(completed, 4);

    // The successor fires after the *final* run, not between the two.
    assert_eq!(*order.lock().unwrap(), vec!["y1", "y2", "s"]);
}

#[test]
fn initialization_finishes_before_external_spawns_run() {
    let mut scheduler = Scheduler::with_workers(4).unwrap();
    assert_eq!(scheduler.worker_count(), 4);

    // A spawn from the caller thread (not a worker) routes to some worker
    // and runs there.
    let (tx, rx) = mpsc::channel();
    scheduler.detach_task(move || {
        tx.send(thread::current().id()).unwrap();
    });
    let worker_thread = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("external spawn executed");
    assert_ne!(worker_thread, thread::current().id());
    scheduler.shutdown();
}

#[test]
fn shutdown_drops_queued_tasks_without_running_them() {
    let mut scheduler = Scheduler::with_workers(1).unwrap();

    // Occupy the only worker so everything spawned next stays queued.
    let (started_tx, started_rx) = mpsc::channel();
    scheduler.detach_task(move || {
        started_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(500));
    });
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("blocker started");

    let drops = Arc::new(AtomicUsize::new(0));
    let executed = Arc::new(AtomicUsize::new(0));
    for _ in 0..50 {
        let probe = DropProbe {
            drops: Arc::clone(&drops),
        };
        let executed = Arc::clone(&executed);
        scheduler.detach_task(move || {
            let _probe = &probe;
            executed.fetch_add(1, Ordering::Relaxed);
        });
    }

    // Requested while the blocker still sleeps: the worker exits at its
    // next fetch boundary and clears its queue.
    scheduler.shutdown();

    assert_eq!(executed.load(Ordering::Relaxed), 0, "queued tasks never ran");
    assert_eq!(drops.load(Ordering::Relaxed), 50, "each callable dropped once");
}

#[test]
fn panicking_task_still_releases_its_successors() {
    let mut scheduler = Scheduler::with_workers(2).unwrap();

    let (tx, rx) = mpsc::channel();
    scheduler.detach_task(move || {
        let doomed = current::emplace_task(&[], || panic!("task failure"));
        let tx = tx.clone();
        current::emplace_task(&[doomed], move || tx.send(()).unwrap());
    });

    rx.recv_timeout(Duration::from_secs(5))
        .expect("successor of the panicking task ran");
    scheduler.shutdown();
}

#[test]
fn local_queue_is_lifo() {
    let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let mut scheduler = Scheduler::with_workers(1).unwrap();

    // Hold the worker so the next three tasks pile up in its queue.
    let (started_tx, started_rx) = mpsc::channel();
    scheduler.detach_task(move || {
        started_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(100));
    });
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("blocker started");

    for i in 1..=3 {
        let order = Arc::clone(&order);
        scheduler.detach_task(move || order.lock().unwrap().push(i));
    }

    let completed = scheduler.wait_for_completion(4, Duration::from_secs(5));
    scheduler.shutdown();
    assert_eq!(completed, 4);

    // Most recently pushed runs first.
    assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
}

#[test]
fn schedulers_are_independent_handles() {
    let mut a = Scheduler::with_workers(1).unwrap();
    let mut b = Scheduler::with_workers(1).unwrap();

    let hits_a = Arc::new(AtomicUsize::new(0));
    let hits_b = Arc::new(AtomicUsize::new(0));

    let h = Arc::clone(&hits_a);
    a.detach_task(move || {
        h.fetch_add(1, Ordering::Relaxed);
    });
    let h = Arc::clone(&hits_b);
    b.detach_task(move || {
        h.fetch_add(1, Ordering::Relaxed);
    });

    assert_eq!(a.wait_for_completion(1, Duration::from_secs(5)), 1);
    assert_eq!(b.wait_for_completion(1, Duration::from_secs(5)), 1);
    a.shutdown();
    b.shutdown();

    assert_eq!(hits_a.load(Ordering::Relaxed), 1);
    assert_eq!(hits_b.load(Ordering::Relaxed), 1);
}

#[test]
fn detach_from_a_foreign_worker_routes_to_the_owning_scheduler() {
    let mut a = Scheduler::with_workers(1).unwrap();
    let b = Arc::new(Scheduler::with_workers(1).unwrap());

    let (tx, rx) = mpsc::channel();
    let b_handle = Arc::clone(&b);
    a.detach_task(move || {
        // Runs on one of `a`'s workers, which is foreign to `b`.
        let tx = tx.clone();
        b_handle.detach_task(move || {
            tx.send(thread::current().id()).unwrap();
        });
    });

    let ran_on = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("task spawned across schedulers ran");
    assert_ne!(ran_on, thread::current().id());
    a.shutdown();
}

#[test]
#[should_panic(expected = "capacity")]
fn overflowing_a_worker_queue_panics() {
    let mut scheduler = Scheduler::new(SchedulerConfig {
        worker_count: Some(1),
        queue_capacity: 4,
        ..SchedulerConfig::default()
    })
    .unwrap();

    // Occupy the worker so pushed tasks are not drained.
    let (started_tx, started_rx) = mpsc::channel();
    scheduler.detach_task(move || {
        started_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(300));
    });
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("blocker started");

    for _ in 0..5 {
        scheduler.detach_task(|| {});
    }
    scheduler.shutdown();
}
