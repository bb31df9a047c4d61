//! Downgradable reader-writer lock with non-blocking acquisition.
//!
//! `downsync` provides shared-read / exclusive-write locking for OS threads
//! with one operation most reader-writer locks lack: *downgrade*, which
//! atomically converts an exclusive hold into a shared hold with no window
//! in which another writer can interpose. Both modes also have non-blocking
//! `try_` variants.
//!
//! Three layers, leaves first:
//!
//! - [`Semaphore`]: counting semaphore with strict-FIFO thread parking;
//!   posts are never lost and each release wakes exactly one thread.
//! - [`TryMutex`]: exclusive mutex whose `try_acquire` is a single
//!   compare-and-swap of the state word; serializes writers.
//! - [`RawRwLock`] / [`RwLock`]: the reader-writer lock itself. The raw
//!   form exposes bare acquire/release operations; [`RwLock`] wraps a value
//!   and ties holds to RAII guards.
//!
//! The read fast path is lock-free: a single atomic increment on a signed
//! counter that encodes both the active-reader count and, via a large
//! negative bias, writer-pending state. Threads park only under contention
//! with a writer.
//!
//! # Happens-before edges
//!
//! The lock establishes exactly four ordering edges between critical
//! sections:
//!
//! - `write_release` → `write_acquire` via the writer semaphore
//! - `write_release` → `read_acquire` via the reader semaphore
//! - `read_release` → `write_acquire` via the writer semaphore
//! - `downgrade` → `read_acquire` via the reader semaphore
//!
//! Compiled with `RUSTFLAGS="--cfg loom"`, the implementation swaps its
//! atomics and parking substrate for loom's, so the model tests in
//! `tests/rwlock_loom.rs` exhaustively check these edges against the real
//! code.
//!
//! # Example
//!
//! ```
//! use downsync::{RwLock, RwLockWriteGuard};
//!
//! let lock = RwLock::new(Vec::new());
//!
//! // Exclusive phase: build the data.
//! let mut write = lock.write();
//! write.push("ready");
//!
//! // Downgrade: keep reading what was just written without letting
//! // another writer in between.
//! let read = RwLockWriteGuard::downgrade(write);
//! assert_eq!(read.len(), 1);
//!
//! // Other readers may join; writers must wait.
//! assert!(lock.try_read().is_some());
//! assert!(lock.try_write().is_none());
//!
//! drop(read);
//! assert!(lock.try_write().is_some());
//! ```
//!
//! # Misuse
//!
//! Releasing a hold that does not exist (`read_release`, `write_release`,
//! or `downgrade` on an unheld [`RawRwLock`], or
//! [`TryMutex::release`] on an unheld mutex) is a programmer error and
//! panics. There are no recoverable errors: the `try_` variants report
//! contention through their return value.

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod loom_compat;
mod rwlock;
mod semaphore;
mod try_mutex;

pub use rwlock::{RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use semaphore::Semaphore;
pub use try_mutex::TryMutex;
