//! Counting semaphore with strict-FIFO thread parking.
//!
//! [`Semaphore`] is the parking substrate for the crate's locks. A post is
//! never lost: when no thread is parked, the permit is banked; when threads
//! are parked, the permit is handed directly to the longest-waiting one, so
//! exactly one thread wakes per release.

use std::collections::VecDeque;

use crate::loom_compat::{Arc, Condvar, Mutex};

/// One parked thread: a mutex-guarded permit flag plus a condvar.
///
/// Each waiter parks on its own `Parker`, so a release wakes exactly the
/// thread it hands the permit to and no other.
struct Parker {
    notified: Mutex<bool>,
    cvar: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            notified: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    fn park(&self) {
        let mut notified = self.notified.lock();
        while !*notified {
            notified = self.cvar.wait(notified);
        }
    }

    fn unpark(&self) {
        *self.notified.lock() = true;
        self.cvar.notify_one();
    }
}

/// Invariant: `permits` is nonzero only while `waiters` is empty. A release
/// that finds a waiter transfers its permit instead of banking it.
struct SemState {
    permits: usize,
    waiters: VecDeque<Arc<Parker>>,
}

/// A counting semaphore with strict-FIFO wakeups.
///
/// Unlike a condition variable, a release is never lost: a post that
/// arrives before the matching [`acquire`](Semaphore::acquire) is banked
/// and consumed by the next acquirer without parking. Parked threads are
/// woken one per release, in park order.
pub struct Semaphore {
    state: Mutex<SemState>,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` banked posts.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(SemState {
                permits,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Takes one permit, parking the calling thread until one is available.
    pub fn acquire(&self) {
        let parker = {
            let mut state = self.state.lock();
            if state.permits > 0 {
                state.permits -= 1;
                return;
            }
            let parker = Arc::new(Parker::new());
            state.waiters.push_back(Arc::clone(&parker));
            parker
        };
        tracing::trace!("no permits available, parking");
        parker.park();
    }

    /// Takes one permit without parking.
    ///
    /// Fails when no permit is banked, or when parked waiters exist — the
    /// queue is strict FIFO and a try must not overtake it.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.permits > 0 && state.waiters.is_empty() {
            state.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Posts one permit, waking the longest-parked thread if any.
    pub fn release(&self) {
        let waiter = {
            let mut state = self.state.lock();
            match state.waiters.pop_front() {
                Some(waiter) => Some(waiter),
                None => {
                    state.permits += 1;
                    None
                }
            }
        };
        if let Some(waiter) = waiter {
            tracing::trace!("handing permit to front waiter");
            waiter.unpark();
        }
    }

    /// Advisory count of banked permits. Stale by the time it returns.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.state.lock().permits
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.available_permits())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::sync::Arc as StdArc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn banked_permits_are_consumed_without_parking() {
        let sem = Semaphore::new(2);
        sem.acquire();
        sem.acquire();
        assert_eq!(sem.available_permits(), 0);
    }

    #[test]
    fn try_acquire_exhausts_permits() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert!(sem.try_acquire());
    }

    #[test]
    fn release_before_acquire_is_not_lost() {
        let sem = Semaphore::new(0);
        sem.release();
        // The banked post lets this acquire return immediately.
        sem.acquire();
        assert_eq!(sem.available_permits(), 0);
    }

    #[test]
    fn acquire_parks_until_release() {
        let sem = StdArc::new(Semaphore::new(0));
        let acquired = StdArc::new(AtomicBool::new(false));

        let s = StdArc::clone(&sem);
        let flag = StdArc::clone(&acquired);
        let handle = thread::spawn(move || {
            s.acquire();
            flag.store(true, Ordering::Release);
        });

        // Give the waiter time to park; it must not get through yet.
        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::Acquire));

        sem.release();
        handle.join().expect("waiter panicked");
        assert!(acquired.load(Ordering::Acquire));
    }

    #[test]
    fn parked_waiters_wake_in_fifo_order() {
        let sem = StdArc::new(Semaphore::new(0));
        let order = StdArc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for id in 1..=3_u32 {
            let s = StdArc::clone(&sem);
            let order = StdArc::clone(&order);
            handles.push(thread::spawn(move || {
                s.acquire();
                order.lock().push(id);
                // Chain the wake to the next queued waiter.
                s.release();
            }));
            // Small delay so waiters queue in id order.
            thread::sleep(Duration::from_millis(10));
        }

        sem.release();
        for handle in handles {
            handle.join().expect("waiter panicked");
        }

        assert_eq!(*order.lock(), vec![1, 2, 3]);
        // The chained release of the last waiter stays banked.
        assert_eq!(sem.available_permits(), 1);
    }
}
