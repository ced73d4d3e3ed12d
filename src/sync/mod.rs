//! Synchronization primitives built on the scheduler's yield.
//!
//! Nothing here blocks the OS thread: a contended lock polls and yields its
//! timeslice until the owner releases it.

pub mod mutex;

pub use mutex::{Mutex, MutexGuard, RawMutex};
