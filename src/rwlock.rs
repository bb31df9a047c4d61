//! Downgradable reader-writer lock.
//!
//! Allows many concurrent readers or one exclusive writer, and — unlike
//! most reader-writer locks — lets a writer atomically *downgrade* its
//! exclusive hold into a shared hold, with no window in which another
//! writer can interpose.
//!
//! # Writer-Preference Fairness
//!
//! Once a writer announces itself, new readers park behind it; the writer
//! waits only for the readers that were already counted. This prevents
//! writer starvation under heavy read load.
//!
//! | Scenario                  | Behavior                                   |
//! |---------------------------|--------------------------------------------|
//! | No writer pending         | Readers acquire on the lock-free fast path |
//! | Writer announced          | New readers park until the writer is done  |
//! | Existing readers + writer | Writer parks until counted readers drain   |
//! | Multiple writers          | Serialized by the admission gate           |
//!
//! There is no FIFO promise among concurrent readers, nor between readers
//! and a writer beyond the announcement rule above.
//!
//! # State encoding
//!
//! A single signed 32-bit counter carries both logical states: its
//! magnitude is the active-reader count, and a `-MAX_READERS` bias marks a
//! pending or active writer. All seven operations are short sequences of
//! sequentially consistent arithmetic on that counter, with two counting
//! semaphores as the only parking points.
//!
//! # Happens-before edges
//!
//! - `write_release` → `write_acquire` via the writer semaphore
//! - `write_release` → `read_acquire` via the reader semaphore
//! - `read_release` → `write_acquire` via the writer semaphore
//! - `downgrade` → `read_acquire` via the reader semaphore

#![allow(unsafe_code)]

use std::ops::{Deref, DerefMut};

use crate::loom_compat::{AtomicI32, Ordering, UnsafeCell};
use crate::semaphore::Semaphore;
use crate::try_mutex::TryMutex;

/// Bias added to the reader counter while a writer is pending. Also the
/// supported ceiling on concurrent readers; exceeding it is undefined.
const MAX_READERS: i32 = 1 << 30;

/// The raw downgradable reader-writer lock: bare acquire/release
/// operations, no guards, no protected value.
///
/// Most callers want [`RwLock`], which wraps a value and ties holds to
/// RAII guards. The raw form exists for callers that manage the protected
/// resource themselves; every release must pair with an acquire in the
/// same mode, and unpaired releases panic.
pub struct RawRwLock {
    /// Held for the whole writer phase; serializes writers.
    w: TryMutex,
    /// A pending writer parks here while counted readers drain.
    writer_sem: Semaphore,
    /// Readers park here while a writer is pending or active.
    reader_sem: Semaphore,
    /// Active readers, biased by `-MAX_READERS` while a writer is pending.
    reader_count: AtomicI32,
    /// Readers the pending writer still waits for.
    reader_wait: AtomicI32,
}

impl RawRwLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            w: TryMutex::new(),
            writer_sem: Semaphore::new(0),
            reader_sem: Semaphore::new(0),
            reader_count: AtomicI32::new(0),
            reader_wait: AtomicI32::new(0),
        }
    }

    /// Acquires a shared hold, parking if a writer is pending.
    pub fn read_acquire(&self) {
        if self.reader_count.fetch_add(1, Ordering::SeqCst) + 1 < 0 {
            // A writer is pending, wait for it.
            tracing::trace!("writer pending, parking reader");
            self.reader_sem.acquire();
        }
    }

    /// Attempts a shared hold without parking.
    ///
    /// Fails whenever a writer is pending or active.
    pub fn try_read_acquire(&self) -> bool {
        loop {
            let count = self.reader_count.load(Ordering::SeqCst);
            if count < 0 {
                return false;
            }
            if self
                .reader_count
                .compare_exchange(count, count + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Releases one shared hold.
    ///
    /// If a writer is pending, this reader is draining: the last drainer
    /// posts the writer semaphore. Never parks.
    ///
    /// # Panics
    ///
    /// Panics if no shared hold exists.
    pub fn read_release(&self) {
        let prev = self.reader_count.fetch_sub(1, Ordering::SeqCst);
        if prev - 1 < 0 {
            assert!(
                prev != 0 && prev != -MAX_READERS,
                "read_release of unlocked RawRwLock"
            );
            // A writer is pending.
            if self.reader_wait.fetch_sub(1, Ordering::SeqCst) == 1 {
                // The last draining reader unblocks the writer.
                self.writer_sem.release();
            }
        }
    }

    /// Acquires the exclusive hold, parking until all counted readers
    /// drain.
    pub fn write_acquire(&self) {
        // Resolve competition with other writers first.
        self.w.acquire();
        // Announce the pending writer to readers.
        let readers = self.reader_count.fetch_add(-MAX_READERS, Ordering::SeqCst);
        // Wait for the readers that were already counted.
        if readers != 0 && self.reader_wait.fetch_add(readers, Ordering::SeqCst) + readers != 0 {
            tracing::trace!(readers, "parking writer until readers drain");
            self.writer_sem.acquire();
        }
    }

    /// Attempts the exclusive hold without parking.
    ///
    /// Fails when another writer holds the admission gate or any reader is
    /// counted; a failed attempt leaves the gate released.
    pub fn try_write_acquire(&self) -> bool {
        if !self.w.try_acquire() {
            return false;
        }
        // Only proceed when no readers hold the lock.
        if self
            .reader_count
            .compare_exchange(0, -MAX_READERS, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.w.release();
            return false;
        }
        true
    }

    /// Releases the exclusive hold, waking every reader that parked while
    /// the writer was active.
    ///
    /// # Panics
    ///
    /// Panics if no exclusive hold exists.
    pub fn write_release(&self) {
        // Announce that no writer is active.
        let readers = self.reader_count.fetch_add(MAX_READERS, Ordering::SeqCst) + MAX_READERS;
        assert!(readers < MAX_READERS, "write_release of unlocked RawRwLock");
        // Wake the readers that parked during the write phase.
        for _ in 0..readers {
            self.reader_sem.release();
        }
        // Let the next writer at the admission gate.
        self.w.release();
    }

    /// Atomically converts the exclusive hold into a shared hold.
    ///
    /// Parked readers are woken alongside the caller. The admission gate is
    /// released last: the next writer may then enter `write_acquire`, but
    /// it parks on the writer semaphore behind at least the downgraded
    /// hold, so no other writer interposes between the write phase and the
    /// shared hold. Never parks.
    ///
    /// # Panics
    ///
    /// Panics if no exclusive hold exists.
    pub fn downgrade(&self) {
        // Clear the writer bias and count this thread as a reader.
        let readers =
            self.reader_count.fetch_add(MAX_READERS + 1, Ordering::SeqCst) + MAX_READERS + 1;
        assert!(readers < MAX_READERS + 1, "downgrade of unlocked RawRwLock");
        // Wake parked readers. The loop starts at 1 because `readers`
        // includes the caller.
        for _ in 1..readers {
            self.reader_sem.release();
        }
        self.w.release();
    }

    /// Advisory snapshot of the reader counter: the active-reader count,
    /// biased negative while a writer is pending or active. Stale by the
    /// time it returns; diagnostic use only.
    #[must_use]
    pub fn reader_count(&self) -> i32 {
        self.reader_count.load(Ordering::SeqCst)
    }
}

impl Default for RawRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RawRwLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRwLock")
            .field("reader_count", &self.reader_count())
            .finish()
    }
}

/// A value protected by a [`RawRwLock`], with RAII guards.
///
/// Many readers share the value through [`RwLockReadGuard`]; one writer
/// mutates it through [`RwLockWriteGuard`]; and
/// [`RwLockWriteGuard::downgrade`] converts the latter into the former
/// atomically.
///
/// # Example
///
/// ```
/// use downsync::{RwLock, RwLockWriteGuard};
///
/// let lock = RwLock::new(0_u32);
///
/// let mut write = lock.write();
/// *write = 7;
/// let read = RwLockWriteGuard::downgrade(write);
///
/// // The downgraded hold is shared: other readers may enter,
/// // writers may not.
/// assert!(lock.try_read().is_some());
/// assert!(lock.try_write().is_none());
/// assert_eq!(*read, 7);
/// ```
pub struct RwLock<T> {
    raw: RawRwLock,
    data: UnsafeCell<T>,
}

// SAFETY: The lock hands out either many shared references (requiring
// `T: Sync` for cross-thread sharing) or one exclusive reference
// (requiring `T: Send` to move the value's ownership across threads).
unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    /// Creates an unlocked lock wrapping `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            raw: RawRwLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires a shared hold, parking if a writer is pending.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.raw.read_acquire();
        RwLockReadGuard { lock: self }
    }

    /// Attempts a shared hold without parking.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        if self.raw.try_read_acquire() {
            Some(RwLockReadGuard { lock: self })
        } else {
            None
        }
    }

    /// Acquires the exclusive hold, parking until readers drain.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.raw.write_acquire();
        RwLockWriteGuard { lock: self }
    }

    /// Attempts the exclusive hold without parking.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        if self.raw.try_write_acquire() {
            Some(RwLockWriteGuard { lock: self })
        } else {
            None
        }
    }

    /// Returns a mutable reference to the protected value.
    ///
    /// `&mut self` proves no holds exist, so no locking is needed.
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: Exclusive access to the lock means no guards are live.
        unsafe { &mut *self.data.with_mut(|ptr| ptr) }
    }

    /// Consumes the lock and returns the protected value.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("RwLock");
        match self.try_read() {
            Some(guard) => s.field("data", &&*guard),
            None => s.field("data", &format_args!("<locked>")),
        };
        s.finish()
    }
}

/// RAII guard for a shared hold; released on drop.
#[must_use = "the shared hold is released immediately if the guard is dropped"]
pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: A shared hold is live — no writer can exist.
        unsafe { &*self.lock.data.with(|ptr| ptr) }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.read_release();
    }
}

/// RAII guard for the exclusive hold; released on drop.
#[must_use = "the exclusive hold is released immediately if the guard is dropped"]
pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<'a, T> RwLockWriteGuard<'a, T> {
    /// Atomically downgrades the exclusive hold into a shared hold.
    ///
    /// No other writer can interpose between the write phase and the
    /// returned shared hold. Called as
    /// `RwLockWriteGuard::downgrade(guard)` so the name cannot collide
    /// with a `downgrade` method on `T`.
    pub fn downgrade(guard: Self) -> RwLockReadGuard<'a, T> {
        let lock = guard.lock;
        lock.raw.downgrade();
        // The exclusive hold is already gone; the guard must not release
        // it a second time on drop.
        std::mem::forget(guard);
        RwLockReadGuard { lock }
    }
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The exclusive hold is live — no other hold can exist.
        unsafe { &*self.lock.data.with(|ptr| ptr) }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The exclusive hold is live — no other hold can exist.
        unsafe { &mut *self.lock.data.with_mut(|ptr| ptr) }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.write_release();
    }
}
