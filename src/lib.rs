#![deny(unsafe_op_in_unsafe_fn)]
#![forbid(unreachable_pub)]

//! User-level preemptive green threads for Linux.
//!
//! Many lightweight threads share the OS thread that initialised the
//! runtime. Each has its own stack; a CPU-time interval timer preempts the
//! running thread and the scheduler hands the CPU to the next one in
//! round-robin order. The API follows the shape of pthreads: create, exit,
//! join, yield, equal, cancel, self and a non-recursive mutex.
//!
//! # Target Platform
//!
//! - **OS**: Linux
//! - **Architecture**: x86_64 or AArch64
//!
//! # Features
//!
//! - `guard-pages`: map stacks with a `PROT_NONE` guard page (default)
//!
//! # Quick Start
//!
//! ```no_run
//! use green_threads::Mutex;
//!
//! green_threads::init(10_000).expect("runtime");
//!
//! // Rc reference counts are not preemption safe; share a leaked reference.
//! let counter: &'static Mutex<u64> = Box::leak(Box::new(Mutex::new(0)));
//! let workers: Vec<_> = (0..4)
//!     .map(|_| {
//!         green_threads::spawn(move || {
//!             for _ in 0..1000 {
//!                 *counter.lock().unwrap() += 1;
//!             }
//!         })
//!         .unwrap()
//!     })
//!     .collect();
//!
//! for worker in workers {
//!     worker.join().unwrap();
//! }
//! assert_eq!(*counter.lock().unwrap(), 4000);
//! ```
//!
//! # Architecture
//!
//! - Context switching in hand-written assembly per ISA (`arch`)
//! - Exclusively owned stacks with guard pages, recycled through a pool (`mem`)
//! - Round-robin ready queue (`sched`)
//! - Signal-driven preemption with masked critical sections (`platform_timer`)
//! - Thread registry and switch protocol (`runtime`)
//!
//! The runtime is bound to one OS thread. Thread handles are only
//! meaningful on the OS thread that created them, and mutexes are `!Sync`.
//!
//! With preemption enabled a thread can be interrupted anywhere, including
//! inside the global allocator or while holding the stdout lock. Wrap such
//! calls in a [`PreemptGuard`] when another green thread may make them too.

pub mod arch;
pub mod config;
pub mod errors;
pub mod mem;
pub mod platform_timer;
pub mod runtime;
pub mod sched;
pub mod sync;
pub mod thread;

#[cfg(test)]
mod tests;

use core::convert::Infallible;
use core::time::Duration;
use runtime::current_runtime;

// ============================================================================
// Public API
// ============================================================================

// Architecture abstraction
pub use arch::{Arch, DefaultArch};

// Configuration
pub use config::{Config, DEFAULT_STACK_SIZE, MIN_PANIC_STACK_SIZE};

// Runtime
pub use runtime::{RuntimeStats, ThreadInfo};

// Scheduler
pub use sched::{RoundRobinScheduler, Scheduler};

// Threads
pub use thread::{ExitValue, JoinHandle, Thread, ThreadBuilder, ThreadId, ThreadState};

// Synchronization
pub use platform_timer::{without_preemption, PreemptGuard};
pub use sync::{Mutex, MutexGuard, RawMutex};

// Memory management
pub use mem::{Stack, StackPool};

// Errors
pub use errors::{
    InvalidOperationError, JoinError, MutexError, SpawnError, ThreadError, ThreadResult, TimerError,
};

// ============================================================================
// Convenience Functions
// ============================================================================

/// Initialise the runtime on the calling OS thread with a timeslice of
/// `period_us` microseconds.
///
/// The caller becomes the main green thread. Calling it again on the same OS
/// thread fails with [`InvalidOperationError::AlreadyInitialized`].
pub fn init(period_us: u64) -> ThreadResult<()> {
    init_with(Config::new().period(Duration::from_micros(period_us)))
}

/// Initialise the runtime with an explicit configuration.
pub fn init_with(config: Config) -> ThreadResult<()> {
    runtime::install(config)
}

/// Create a thread running `f` with the default configuration.
///
/// The new thread is appended to the ready queue; the caller keeps running.
pub fn spawn<F, T>(f: F) -> ThreadResult<JoinHandle<T>>
where
    F: FnOnce() -> T + 'static,
    T: 'static,
{
    ThreadBuilder::new().spawn(f)
}

/// Terminate the calling thread, making `value` its result.
///
/// Frames between the entry closure and this call are abandoned without
/// running their destructors. When the main thread exits, the process ends
/// once every other thread has finished.
///
/// # Panics
///
/// Panics if the runtime is not initialised on this OS thread. This is the
/// one convenience function that does not report that case as an error,
/// since it has nothing to return on success; use [`try_exit`] to get the
/// error instead.
pub fn exit<T: 'static>(value: T) -> ! {
    match try_exit(value) {
        Ok(never) => match never {},
        Err(error) => panic!("exit called outside a green thread: {}", error),
    }
}

/// Like [`exit`], but returns the error when the runtime is not initialised
/// on this OS thread. Only ever returns `Err`.
pub fn try_exit<T: 'static>(value: T) -> ThreadResult<Infallible> {
    let runtime = current_runtime()?;
    runtime.exit_current(thread::ExitStatus::Returned(Box::new(value)))
}

/// Wait for `thread` to finish and take its result.
///
/// A cancelled thread yields `Err(JoinError::Cancelled)`; a panicked one
/// `Err(JoinError::ThreadPanicked)`. Each result can be taken once.
pub fn join(thread: Thread) -> ThreadResult<ExitValue> {
    current_runtime()?.join(thread.id())
}

/// Give up the rest of the current timeslice.
///
/// Returns immediately when no other thread is ready.
pub fn yield_now() -> ThreadResult<()> {
    current_runtime()?.yield_now();
    Ok(())
}

/// Whether two handles name the same thread.
#[inline]
pub fn equal(a: Thread, b: Thread) -> bool {
    a == b
}

/// Cancel `thread` immediately.
///
/// Cancelling the calling thread does not return. Resources the target
/// holds, such as a locked mutex, are not released.
pub fn cancel(thread: Thread) -> ThreadResult<()> {
    current_runtime()?.cancel(thread.id())
}

/// Handle of the calling thread.
pub fn current() -> ThreadResult<Thread> {
    Ok(Thread::from_id(current_runtime()?.current_id()))
}

/// Activity counters of the calling OS thread's runtime.
pub fn stats() -> ThreadResult<RuntimeStats> {
    Ok(current_runtime()?.stats())
}

/// Every live thread in dispatch order, then retired threads not yet joined.
pub fn threads() -> ThreadResult<Vec<ThreadInfo>> {
    Ok(current_runtime()?.threads())
}
