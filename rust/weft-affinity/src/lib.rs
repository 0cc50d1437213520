//! Processor-affinity facility for the weft scheduler.
//!
//! The scheduler needs exactly two things from the platform: the set of
//! logical cores the current process is allowed to run on, and the ability to
//! pin the calling thread to a subset of them. Both are exposed here behind a
//! small, platform-neutral surface:
//!
//! * [`process_affinity`] — query the process's allowed cores.
//! * [`set_thread_affinity`] / [`pin_current_thread`] — restrict the calling
//!   thread to a core set (or a single core). Pinning is best-effort; the
//!   return value reports success and callers are expected to treat failure
//!   as non-fatal.
//! * [`CoreSet`] — a sorted set of logical core ids with the intersection and
//!   iteration operations the scheduler's initialization needs.
//!
//! On Linux the implementation uses `sched_getaffinity` / `sched_setaffinity`
//! through the `nix` crate. On other platforms the module degrades
//! permissively: every core is reported as allowed and pinning reports
//! failure (which callers log and ignore).

use std::fmt;
use std::io;

// ---------------------------------------------------------------------------
// CoreSet
// ---------------------------------------------------------------------------

/// A set of logical core ids.
///
/// Stored as a sorted, deduplicated vector — core counts are small and the
/// set is built once at scheduler start-up, so a bitset buys nothing here.
#[derive(Clone, PartialEq, Eq)]
pub struct CoreSet {
    cores: Vec<usize>,
}

impl CoreSet {
    /// Build a core set from arbitrary core ids (duplicates are dropped).
    pub fn new(cores: impl IntoIterator<Item = usize>) -> Self {
        let mut cores: Vec<usize> = cores.into_iter().collect();
        cores.sort_unstable();
        cores.dedup();
        Self { cores }
    }

    /// The set of every core id the machine reports, `0..n`.
    pub fn all() -> Self {
        Self::new(0..num_cpus::get())
    }

    /// The empty set.
    pub fn empty() -> Self {
        Self { cores: Vec::new() }
    }

    /// Set intersection.
    pub fn intersect(&self, other: &CoreSet) -> CoreSet {
        CoreSet {
            cores: self
                .cores
                .iter()
                .copied()
                .filter(|c| other.contains(*c))
                .collect(),
        }
    }

    /// Whether `core` is a member.
    pub fn contains(&self, core: usize) -> bool {
        self.cores.binary_search(&core).is_ok()
    }

    /// Number of cores in the set.
    pub fn len(&self) -> usize {
        self.cores.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    /// Iterate over the core ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.cores.iter().copied()
    }
}

impl FromIterator<usize> for CoreSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Debug for CoreSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CoreSet").field(&self.cores).finish()
    }
}

impl fmt::Display for CoreSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, core) in self.cores.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", core)?;
        }
        write!(f, "}}")
    }
}

// ---------------------------------------------------------------------------
// Platform surface
// ---------------------------------------------------------------------------

/// Query the set of cores the current process is allowed to run on.
pub fn process_affinity() -> io::Result<CoreSet> {
    imp::process_affinity()
}

/// Restrict the calling thread to the given core set.
///
/// Returns `true` on success. Failure (unsupported platform, core outside
/// the process mask, empty set) is reported rather than raised — pinning is
/// an optimization, not a correctness requirement.
pub fn set_thread_affinity(cores: &CoreSet) -> bool {
    if cores.is_empty() {
        return false;
    }
    imp::set_thread_affinity(cores)
}

/// Pin the calling thread to a single core.
pub fn pin_current_thread(core: usize) -> bool {
    set_thread_affinity(&CoreSet::new([core]))
}

#[cfg(target_os = "linux")]
mod imp {
    use super::CoreSet;
    use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
    use nix::unistd::Pid;
    use std::io;

    pub(super) fn process_affinity() -> io::Result<CoreSet> {
        let cpuset = sched_getaffinity(Pid::from_raw(0))
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
        let mut cores = Vec::new();
        for core in 0..CpuSet::count() {
            if cpuset.is_set(core).unwrap_or(false) {
                cores.push(core);
            }
        }
        Ok(CoreSet::new(cores))
    }

    pub(super) fn set_thread_affinity(cores: &CoreSet) -> bool {
        let mut cpuset = CpuSet::new();
        for core in cores.iter() {
            if cpuset.set(core).is_err() {
                log::debug!("core id {} not representable in cpu_set_t", core);
                return false;
            }
        }
        // Pid 0 targets the calling thread.
        sched_setaffinity(Pid::from_raw(0), &cpuset).is_ok()
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::CoreSet;
    use std::io;

    pub(super) fn process_affinity() -> io::Result<CoreSet> {
        Ok(CoreSet::all())
    }

    pub(super) fn set_thread_affinity(_cores: &CoreSet) -> bool {
        log::debug!("thread pinning is not supported on this platform");
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
