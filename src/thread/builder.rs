//! Thread builder for configuring thread creation.

use super::{ExitValue, JoinHandle, Thread};
use crate::config::validate_stack_size;
use crate::errors::ThreadResult;
use crate::platform_timer::PreemptGuard;
use crate::runtime::current_runtime;

/// Builder for configuring and creating new threads.
#[derive(Debug, Default)]
pub struct ThreadBuilder {
    /// Stack size override in bytes
    stack_size: Option<usize>,
    /// Thread name (for debugging and thread listings)
    name: Option<String>,
}

impl ThreadBuilder {
    /// Create a new thread builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stack size in bytes.
    ///
    /// Defaults to the runtime's configured stack size. A thread that may
    /// panic needs at least [`MIN_PANIC_STACK_SIZE`](crate::config::MIN_PANIC_STACK_SIZE)
    /// for the panic to reach its joiner as `JoinError::ThreadPanicked`.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Set the thread name for debugging purposes.
    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Spawn a new thread with the configured parameters.
    ///
    /// The closure is moved into the new thread's control block; nothing it
    /// captures is referenced from the caller's frame. The thread is queued
    /// behind every existing thread and the call never blocks. Allocation
    /// happens with preemption blocked.
    pub fn spawn<F, T>(self, f: F) -> ThreadResult<JoinHandle<T>>
    where
        F: FnOnce() -> T + 'static,
        T: 'static,
    {
        let runtime = current_runtime()?;
        let stack_size = self.stack_size.unwrap_or(runtime.config().stack_size);
        validate_stack_size(stack_size)?;

        let _guard = PreemptGuard::new();
        let entry = Box::new(move || Box::new(f()) as ExitValue);
        let id = runtime.spawn(entry, stack_size, self.name);
        Ok(JoinHandle::new(Thread::from_id(id)))
    }
}
