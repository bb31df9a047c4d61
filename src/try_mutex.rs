//! Exclusive mutex with non-blocking acquisition.
//!
//! [`TryMutex`] is the writer admission gate for the reader-writer lock. It
//! is a blocking mutex built from scratch on [`Semaphore`], with one
//! addition over the standard shape: [`try_acquire`](TryMutex::try_acquire)
//! is a single compare-and-swap of the state word, flipping the locked bit
//! from 0 to 1 without ever suspending the caller.

use crate::loom_compat::{AtomicI32, Ordering};
use crate::semaphore::Semaphore;

/// State word bit 0: the mutex is held.
const LOCKED: i32 = 1;

/// State word increment for one registered waiter.
const WAITER: i32 = 2;

/// An exclusive mutex with a non-blocking `try_acquire`.
///
/// The lock is not tied to a guard: `acquire` and `release` are separate
/// operations, and the hold may be released from a different thread than
/// the one that acquired it. Acquisition is barging rather than FIFO — a
/// freshly arriving thread may take the lock ahead of a woken waiter.
///
/// # Panics
///
/// [`release`](TryMutex::release) panics when the mutex is not held.
pub struct TryMutex {
    /// Bit 0: locked. Remaining bits: count of registered waiters.
    state: AtomicI32,
    /// Parked waiters; one post per waiter handed off at release.
    sem: Semaphore,
}

impl TryMutex {
    /// Creates an unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicI32::new(0),
            sem: Semaphore::new(0),
        }
    }

    /// Acquires the mutex, parking until it is available.
    pub fn acquire(&self) {
        // Uncontended fast path.
        if self
            .state
            .compare_exchange(0, LOCKED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return;
        }
        loop {
            let state = self.state.load(Ordering::SeqCst);
            if state & LOCKED == 0 {
                if self
                    .state
                    .compare_exchange(state, state | LOCKED, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return;
                }
            } else if self
                .state
                .compare_exchange(state, state + WAITER, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                tracing::trace!("mutex contended, parking");
                self.sem.acquire();
                // Woken by a release that already deregistered this waiter;
                // race fresh arrivals for the lock.
            }
        }
    }

    /// Attempts to acquire the mutex without parking.
    ///
    /// A single compare-and-swap of the whole state word: succeeds only
    /// when the mutex is unlocked *and* no waiters are registered, and
    /// publishes the same happens-before edge as a successful blocking
    /// [`acquire`](TryMutex::acquire).
    pub fn try_acquire(&self) -> bool {
        self.state
            .compare_exchange(0, LOCKED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Releases the mutex.
    ///
    /// If waiters are registered and the lock was not immediately re-taken
    /// by a barging acquirer, deregisters one waiter and posts it.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is not held.
    pub fn release(&self) {
        let prev = self.state.fetch_sub(LOCKED, Ordering::SeqCst);
        assert!(prev & LOCKED == LOCKED, "release of unlocked TryMutex");
        let mut state = prev - LOCKED;
        loop {
            if state < WAITER || state & LOCKED != 0 {
                // No waiters, or a barging acquirer holds the lock now and
                // will wake one on its own release.
                return;
            }
            match self.state.compare_exchange(
                state,
                state - WAITER,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.sem.release();
                    return;
                }
                Err(actual) => state = actual,
            }
        }
    }
}

impl Default for TryMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TryMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.load(Ordering::SeqCst);
        f.debug_struct("TryMutex")
            .field("locked", &(state & LOCKED == LOCKED))
            .field("waiters", &(state >> 1))
            .finish()
    }
}
