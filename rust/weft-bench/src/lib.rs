//! Shared helpers for the weft benchmark suite.

use weft_core::{Scheduler, SchedulerConfig};

/// Bring up a scheduler with `workers` workers and the default queue
/// capacity, panicking on environmental failure (benchmarks have nothing
/// sensible to do with a degraded machine).
pub fn scheduler_with_workers(workers: usize) -> Scheduler {
    Scheduler::new(SchedulerConfig {
        worker_count: Some(workers),
        ..SchedulerConfig::default()
    })
    .expect("scheduler start-up failed")
}
