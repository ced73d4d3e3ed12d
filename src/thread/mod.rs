//! Thread identities, handles and control blocks.
//!
//! A [`Thread`] is a plain copyable identity, the equivalent of `pthread_t`.
//! The runtime keeps one [`Tcb`] per thread; the TCB exclusively owns the
//! thread's stack, saved context and entry closure.

use crate::arch::SavedContext;
use crate::errors::{JoinError, ThreadResult};
use crate::mem::Stack;
use core::num::NonZeroUsize;
use std::any::Any;
use std::fmt;

pub mod builder;
pub mod handle;

pub use builder::ThreadBuilder;
pub use handle::JoinHandle;

/// Value a thread produces, either by returning or through [`crate::exit`].
pub type ExitValue = Box<dyn Any>;

/// Boxed entry closure, captured by value at creation time.
pub(crate) type ThreadEntry = Box<dyn FnOnce() -> ExitValue>;

/// Unique identifier for threads.
///
/// Thread IDs come from a process-wide counter, are never reused and are
/// guaranteed to be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroUsize);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ThreadId {
    /// Create a thread ID from a u64, mapping 0 to 1.
    pub fn new(id: u64) -> Self {
        match NonZeroUsize::new(id as usize) {
            Some(id) => Self(id),
            None => Self(NonZeroUsize::MIN),
        }
    }

    /// Create a new thread ID.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `id` is non-zero.
    pub unsafe fn new_unchecked(id: usize) -> Self {
        Self(unsafe { NonZeroUsize::new_unchecked(id) })
    }

    /// Get the raw ID value.
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// Get the ID as u64.
    pub fn as_u64(self) -> u64 {
        self.0.get() as u64
    }
}

/// Thread execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Thread is queued and waiting for its turn
    Ready,
    /// Thread is the one executing
    Running,
    /// Thread returned, exited or was cancelled; its result awaits a joiner
    Exited,
}

/// Handle identifying a thread.
///
/// Comparing two handles is the `equal` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Thread {
    id: ThreadId,
}

impl Thread {
    pub(crate) fn from_id(id: ThreadId) -> Self {
        Self { id }
    }

    /// Get the thread's unique identifier.
    pub fn id(self) -> ThreadId {
        self.id
    }

    /// Wait for the thread to finish and take its exit value.
    pub fn join(self) -> ThreadResult<ExitValue> {
        crate::join(self)
    }

    /// Cancel the thread immediately.
    pub fn cancel(self) -> ThreadResult<()> {
        crate::cancel(self)
    }

    /// Current state of the thread, `None` once it has been joined.
    pub fn state(self) -> ThreadResult<Option<ThreadState>> {
        Ok(crate::runtime::current_runtime()?.state_of(self.id))
    }
}

impl fmt::Display for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {}", self.id)
    }
}

/// How a thread finished.
pub(crate) enum ExitStatus {
    /// Entry closure returned or the thread called `exit`
    Returned(ExitValue),
    /// Thread was cancelled
    Cancelled,
    /// Entry closure panicked; the payload is kept until the join
    Panicked(Box<dyn Any + Send>),
}

impl ExitStatus {
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            ExitStatus::Returned(_) => "returned",
            ExitStatus::Cancelled => "cancelled",
            ExitStatus::Panicked(_) => "panicked",
        }
    }

    pub(crate) fn into_result(self) -> ThreadResult<ExitValue> {
        match self {
            ExitStatus::Returned(value) => Ok(value),
            ExitStatus::Cancelled => Err(JoinError::Cancelled.into()),
            ExitStatus::Panicked(_) => Err(JoinError::ThreadPanicked.into()),
        }
    }
}

/// Thread control block.
pub(crate) struct Tcb {
    /// Unique thread identifier
    pub(crate) id: ThreadId,
    /// Thread name for debugging
    pub(crate) name: Option<String>,
    /// Current execution state
    pub(crate) state: ThreadState,
    /// Entry closure, taken when the thread first runs
    pub(crate) entry: Option<ThreadEntry>,
    /// Set exactly once when the thread retires
    pub(crate) result: Option<ExitStatus>,
    /// Thread's stack; `None` for the main thread, which runs on the OS stack
    pub(crate) stack: Option<Stack>,
    /// Saved context, written only while the thread is switched out
    pub(crate) context: SavedContext,
    /// Thread currently blocked joining this one
    pub(crate) joiner: Option<ThreadId>,
}

impl Tcb {
    /// Control block for the thread that called `init`.
    pub(crate) fn main(id: ThreadId) -> Self {
        Self {
            id,
            name: Some("main".into()),
            state: ThreadState::Running,
            entry: None,
            result: None,
            stack: None,
            context: SavedContext::default(),
            joiner: None,
        }
    }

    pub(crate) fn new(id: ThreadId, name: Option<String>, entry: ThreadEntry, stack: Stack) -> Self {
        Self {
            id,
            name,
            state: ThreadState::Ready,
            entry: Some(entry),
            result: None,
            stack: Some(stack),
            context: SavedContext::default(),
            joiner: None,
        }
    }

    /// Record the outcome and mark the thread retired.
    ///
    /// # Returns
    ///
    /// The stack, which the caller must not release while still running on it.
    pub(crate) fn retire(&mut self, status: ExitStatus) -> Option<Stack> {
        debug_assert!(self.result.is_none(), "thread {} retired twice", self.id);
        self.state = ThreadState::Exited;
        self.result = Some(status);
        self.stack.take()
    }

    pub(crate) fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}
