//! Scheduler trait definition.

use crate::thread::ThreadId;

/// Ordered collection of runnable threads.
///
/// The thread at the front of the queue is the one currently running. All
/// methods are called with the preemption signal blocked, and `rotate` is
/// also reached from the signal handler, so implementations must not
/// allocate outside of `enqueue`.
pub trait Scheduler {
    /// Append a newly runnable thread at the tail of the queue.
    fn enqueue(&mut self, thread: ThreadId);

    /// The running thread, i.e. the front of the queue.
    fn current(&self) -> Option<ThreadId>;

    /// Move the running thread to the tail.
    ///
    /// # Returns
    ///
    /// `(previous, next)` when another thread should take over, `None` when
    /// the queue holds fewer than two threads.
    fn rotate(&mut self) -> Option<(ThreadId, ThreadId)>;

    /// Remove the running thread for good.
    ///
    /// # Returns
    ///
    /// The thread that runs next, or `None` if the queue is now empty.
    fn retire_current(&mut self) -> Option<ThreadId>;

    /// Remove a thread that is not running.
    ///
    /// Returns `false` if the thread was not queued.
    fn remove(&mut self, thread: ThreadId) -> bool;

    /// Whether `thread` is queued.
    fn contains(&self, thread: ThreadId) -> bool;

    /// Queued threads in dispatch order, running thread first.
    fn threads(&self) -> Vec<ThreadId>;

    /// Number of queued threads.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
