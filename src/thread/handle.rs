//! Join handle implementation for waiting on thread completion.

use super::{Thread, ThreadId, ThreadState};
use crate::errors::{JoinError, ThreadResult};
use core::marker::PhantomData;

/// A typed handle that can be used to wait for a thread to complete.
///
/// Dropping the handle does not affect the thread. The untyped [`Thread`]
/// it wraps can still be joined or cancelled.
pub struct JoinHandle<T> {
    thread: Thread,
    _result: PhantomData<fn() -> T>,
}

impl<T: 'static> JoinHandle<T> {
    pub(crate) fn new(thread: Thread) -> Self {
        Self {
            thread,
            _result: PhantomData,
        }
    }

    /// Wait for the thread to complete and take its result.
    ///
    /// The calling thread keeps yielding its turns until the target retires.
    ///
    /// # Returns
    ///
    /// The value the thread returned or passed to [`crate::exit`].
    /// `JoinError::Cancelled` if it was cancelled, `JoinError::ThreadPanicked`
    /// if it panicked, `JoinError::UnexpectedType` if it exited with a value
    /// that is not a `T`.
    pub fn join(self) -> ThreadResult<T> {
        let value = self.thread.join()?;
        value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| JoinError::UnexpectedType.into())
    }

    /// Check if the thread has retired without blocking.
    pub fn is_finished(&self) -> bool {
        matches!(self.thread.state(), Ok(Some(ThreadState::Exited)) | Ok(None))
    }

    /// Cancel the thread immediately.
    pub fn cancel(&self) -> ThreadResult<()> {
        self.thread.cancel()
    }

    /// The untyped thread handle.
    pub fn thread(&self) -> Thread {
        self.thread
    }

    /// Get the ID of the thread this handle refers to.
    pub fn thread_id(&self) -> ThreadId {
        self.thread.id()
    }
}

impl<T> core::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JoinHandle").field("thread", &self.thread).finish()
    }
}
