//! Reusable countdown latch.
//!
//! The scheduler uses a [`Latch`] to gate worker start-up: every worker
//! signals READY exactly once, and both the initializing thread and the
//! workers themselves block until the full party has arrived. This keeps a
//! worker from ever stealing from a peer that has not finished initializing.
//!
//! Unlike `std::sync::Barrier`, the latch counts *events*, not threads — the
//! signalling side and the waiting side can be different parties — and it can
//! be re-armed with [`Latch::reset`] once it has drained.

use std::fmt;
use std::sync::{Condvar, Mutex};

struct LatchState {
    count: usize,
    waiters: usize,
}

/// A countdown synchronizer.
///
/// The counter is set at construction (or via [`reset`](Latch::reset)) and
/// decremented by [`signal`](Latch::signal). When it reaches zero every
/// waiter is woken; further [`wait`](Latch::wait) calls return immediately
/// until the latch is re-armed.
///
/// Decrementing a latch whose counter is already zero is a programming error
/// and panics.
pub struct Latch {
    state: Mutex<LatchState>,
    cond: Condvar,
}

impl Latch {
    /// Create a latch armed with `count`.
    pub fn new(count: usize) -> Self {
        Self {
            state: Mutex::new(LatchState { count, waiters: 0 }),
            cond: Condvar::new(),
        }
    }

    /// Re-arm the counter to `count`.
    ///
    /// # Panics
    ///
    /// Panics if the counter is non-zero while threads are waiting — the
    /// pending rendezvous would be silently abandoned.
    pub fn reset(&self, count: usize) {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.count == 0 || state.waiters == 0,
            "latch reset while {} threads wait on a count of {}",
            state.waiters,
            state.count
        );
        state.count = count;
        if state.count == 0 {
            self.cond.notify_all();
        }
    }

    /// Decrement the counter, waking every waiter on the transition to zero.
    ///
    /// When `wait_for_zero` is true the caller additionally blocks until the
    /// counter reaches zero, turning the call into a full-party rendezvous.
    ///
    /// # Panics
    ///
    /// Panics if the counter is already zero.
    pub fn signal(&self, wait_for_zero: bool) {
        let mut state = self.state.lock().unwrap();
        assert!(state.count > 0, "latch signalled below zero");
        state.count -= 1;
        if state.count == 0 {
            self.cond.notify_all();
            return;
        }
        if wait_for_zero {
            state.waiters += 1;
            while state.count > 0 {
                state = self.cond.wait(state).unwrap();
            }
            state.waiters -= 1;
        }
    }

    /// Block until the counter reaches zero. Returns immediately if it
    /// already has.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        if state.count == 0 {
            return;
        }
        state.waiters += 1;
        while state.count > 0 {
            state = self.cond.wait(state).unwrap();
        }
        state.waiters -= 1;
    }

    /// Current counter value. Racy by nature; useful for diagnostics only.
    pub fn count(&self) -> usize {
        self.state.lock().unwrap().count
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Latch")
            .field("count", &state.count)
            .field("waiters", &state.waiters)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
