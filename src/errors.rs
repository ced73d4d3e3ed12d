//! Error handling for the green thread runtime.
//!
//! Usage errors are reported to the caller through [`ThreadError`]. Resource
//! exhaustion and broken scheduler invariants are not recoverable and go
//! through [`fatal`] instead.

#![allow(clippy::uninlined_format_args)]

use std::fmt;

/// Result type for threading operations.
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Error type for all threading operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadError {
    /// Thread creation errors
    Spawn(SpawnError),
    /// Thread joining errors
    Join(JoinError),
    /// Mutex usage errors
    Mutex(MutexError),
    /// Preemption timer errors
    Timer(TimerError),
    /// Operation not valid in the current runtime state
    InvalidOperation(InvalidOperationError),
}

/// Errors that can occur during thread creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// Requested stack size is outside the supported range
    InvalidStackSize(usize),
}

/// Errors that can occur during thread joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// A thread tried to join itself
    JoinSelf,
    /// Thread has already been joined, or another thread is joining it
    AlreadyJoined,
    /// No thread with this identity exists in this runtime
    InvalidHandle,
    /// Thread was cancelled before it produced a value
    Cancelled,
    /// Thread panicked during execution
    ///
    /// Only reported for threads whose stack is at least
    /// [`MIN_PANIC_STACK_SIZE`](crate::config::MIN_PANIC_STACK_SIZE); on a
    /// smaller stack the panic overflows it and takes down the process.
    ThreadPanicked,
    /// Thread exited with a value of a different type than the handle expects
    UnexpectedType,
}

/// Errors reported by the mutex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutexError {
    /// The calling thread already holds the mutex (locks are not recursive)
    AlreadyOwned,
    /// The calling thread does not hold the mutex
    NotOwner,
}

/// Preemption timer errors, carrying the OS error number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// `sigaction` failed
    SignalInstall(i32),
    /// `timer_create` failed
    TimerCreate(i32),
    /// `timer_settime` failed
    TimerArm(i32),
}

/// Invalid operation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidOperationError {
    /// No runtime has been initialized on this OS thread
    NotInitialized,
    /// A runtime is already installed on this OS thread
    AlreadyInitialized,
    /// The implicit main thread cannot be cancelled by another thread
    MainThread,
    /// Configuration rejected by validation
    InvalidConfig(String),
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::Spawn(e) => write!(f, "Thread spawn error: {}", e),
            ThreadError::Join(e) => write!(f, "Thread join error: {}", e),
            ThreadError::Mutex(e) => write!(f, "Mutex error: {}", e),
            ThreadError::Timer(e) => write!(f, "Timer error: {}", e),
            ThreadError::InvalidOperation(e) => write!(f, "Invalid operation: {}", e),
        }
    }
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::InvalidStackSize(size) => write!(f, "Invalid stack size: {}", size),
        }
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::JoinSelf => write!(f, "A thread cannot join itself"),
            JoinError::AlreadyJoined => write!(f, "Thread has already been joined"),
            JoinError::InvalidHandle => write!(f, "Invalid thread handle"),
            JoinError::Cancelled => write!(f, "Thread was cancelled"),
            JoinError::ThreadPanicked => write!(f, "Thread panicked during execution"),
            JoinError::UnexpectedType => write!(f, "Thread exited with a value of another type"),
        }
    }
}

impl fmt::Display for MutexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutexError::AlreadyOwned => write!(f, "Mutex is already held by the calling thread"),
            MutexError::NotOwner => write!(f, "Mutex is not held by the calling thread"),
        }
    }
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::SignalInstall(errno) => write!(f, "Failed to install signal handler (errno {})", errno),
            TimerError::TimerCreate(errno) => write!(f, "Failed to create timer (errno {})", errno),
            TimerError::TimerArm(errno) => write!(f, "Failed to arm timer (errno {})", errno),
        }
    }
}

impl fmt::Display for InvalidOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidOperationError::NotInitialized => write!(f, "Runtime not initialized on this OS thread"),
            InvalidOperationError::AlreadyInitialized => write!(f, "Runtime already initialized on this OS thread"),
            InvalidOperationError::MainThread => write!(f, "The main thread cannot be cancelled by another thread"),
            InvalidOperationError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ThreadError {}
impl std::error::Error for SpawnError {}
impl std::error::Error for JoinError {}
impl std::error::Error for MutexError {}
impl std::error::Error for TimerError {}
impl std::error::Error for InvalidOperationError {}

// Conversion implementations for ergonomic error handling

impl From<SpawnError> for ThreadError {
    fn from(error: SpawnError) -> Self {
        ThreadError::Spawn(error)
    }
}

impl From<JoinError> for ThreadError {
    fn from(error: JoinError) -> Self {
        ThreadError::Join(error)
    }
}

impl From<MutexError> for ThreadError {
    fn from(error: MutexError) -> Self {
        ThreadError::Mutex(error)
    }
}

impl From<TimerError> for ThreadError {
    fn from(error: TimerError) -> Self {
        ThreadError::Timer(error)
    }
}

impl From<InvalidOperationError> for ThreadError {
    fn from(error: InvalidOperationError) -> Self {
        ThreadError::InvalidOperation(error)
    }
}

impl ThreadError {
    /// Error returned by every operation on an OS thread without a runtime.
    pub fn not_initialized() -> Self {
        ThreadError::InvalidOperation(InvalidOperationError::NotInitialized)
    }

    /// Create an invalid configuration error with a message.
    pub fn invalid_config(msg: String) -> Self {
        ThreadError::InvalidOperation(InvalidOperationError::InvalidConfig(msg))
    }
}

/// Abort the process after reporting an unrecoverable condition.
///
/// Used when the scheduler can no longer guarantee its own integrity, e.g.
/// a stack could not be mapped.
#[cold]
pub fn fatal(message: &str) -> ! {
    log::error!("fatal: {}", message);
    eprintln!("green-threads: fatal: {}", message);
    std::process::abort()
}
