//! Scheduler error types.
//!
//! Only environmental hard failures surface as errors — everything the
//! taxonomy classifies as a programmer error (double reschedule, latch
//! underflow, self-dependency) panics at the offending call site instead.

use std::io;
use thiserror::Error;

/// Failure to bring up a [`Scheduler`](crate::Scheduler).
///
/// All variants are reported before the scheduler handle exists; any worker
/// threads spawned up to the failure point have been stopped and joined.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Intersecting the requested affinity mask with the process mask left
    /// nothing to run on.
    #[error("no eligible cores after intersecting the requested mask with the process affinity mask")]
    NoEligibleCores,

    /// The process affinity mask could not be queried.
    #[error("failed to query process affinity")]
    Affinity(#[source] io::Error),

    /// An OS worker thread could not be spawned.
    #[error("failed to spawn worker thread")]
    WorkerSpawn(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert!(SchedulerError::NoEligibleCores
            .to_string()
            .contains("no eligible cores"));

        let err = SchedulerError::WorkerSpawn(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(err.to_string().contains("spawn worker"));
    }

    #[test]
    fn source_is_preserved() {
        use std::error::Error as _;
        let err = SchedulerError::Affinity(io::Error::new(io::ErrorKind::Other, "denied"));
        assert!(err.source().is_some());
    }
}
