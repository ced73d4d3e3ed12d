//! Runtime configuration.

use crate::errors::{SpawnError, ThreadError, ThreadResult};
use core::time::Duration;

/// Default usable stack size for new threads, in bytes.
///
/// 8 KiB unless `GREEN_THREADS_STACK_SIZE` is set when the crate is built.
pub const DEFAULT_STACK_SIZE: usize = match option_env!("GREEN_THREADS_STACK_SIZE") {
    Some(value) => parse_size(value),
    None => 8 * 1024,
};

/// Smallest stack a thread may be created with.
pub const MIN_STACK_SIZE: usize = 4 * 1024;

/// Largest stack a thread may be created with.
pub const MAX_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Stack a thread needs for a panic to be caught and reported to its joiner.
///
/// Unwinding and the panic hook run on the panicking thread's own stack and
/// need far more than [`DEFAULT_STACK_SIZE`]. A thread that panics on a
/// smaller stack overflows into its guard page and the process is killed by
/// `SIGSEGV`. A panic hook that captures a backtrace (`RUST_BACKTRACE`) may
/// need more than this.
pub const MIN_PANIC_STACK_SIZE: usize = 256 * 1024;

const fn parse_size(value: &str) -> usize {
    let bytes = value.as_bytes();
    assert!(!bytes.is_empty(), "GREEN_THREADS_STACK_SIZE must not be empty");
    let mut size = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        assert!(
            bytes[i].is_ascii_digit(),
            "GREEN_THREADS_STACK_SIZE must be a decimal byte count"
        );
        size = size * 10 + (bytes[i] - b'0') as usize;
        i += 1;
    }
    size
}

/// Configuration for a green thread runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Timeslice between two preemption ticks
    pub(crate) period: Duration,
    /// Whether the preemption timer is armed at all
    pub(crate) preemption: bool,
    /// Usable stack size for threads that do not override it
    pub(crate) stack_size: usize,
    /// Number of reaped stacks kept around for reuse
    pub(crate) stack_cache: usize,
}

impl Config {
    /// Default timeslice: 10ms
    pub const DEFAULT_PERIOD: Duration = Duration::from_millis(10);
    /// Default number of cached stacks
    pub const DEFAULT_STACK_CACHE: usize = 16;

    /// Create the default configuration.
    pub fn new() -> Self {
        Self {
            period: Self::DEFAULT_PERIOD,
            preemption: true,
            stack_size: DEFAULT_STACK_SIZE,
            stack_cache: Self::DEFAULT_STACK_CACHE,
        }
    }

    /// Create a configuration without a preemption timer.
    ///
    /// Threads only switch when they yield, exit, join or wait on a mutex.
    pub fn cooperative() -> Self {
        Self {
            preemption: false,
            ..Self::new()
        }
    }

    /// Set the timeslice.
    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Enable or disable timer-driven preemption.
    pub fn preemption(mut self, enabled: bool) -> Self {
        self.preemption = enabled;
        self
    }

    /// Set the default stack size in bytes.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// Set how many reaped stacks are cached for reuse.
    pub fn stack_cache(mut self, count: usize) -> Self {
        self.stack_cache = count;
        self
    }

    pub fn get_period(&self) -> Duration {
        self.period
    }

    pub fn is_preemptive(&self) -> bool {
        self.preemption
    }

    pub fn get_stack_size(&self) -> usize {
        self.stack_size
    }

    /// Check the configuration before a runtime is built from it.
    pub fn validate(&self) -> ThreadResult<()> {
        if self.preemption && self.period.is_zero() {
            return Err(ThreadError::invalid_config(
                "preemption period must be non-zero".into(),
            ));
        }
        validate_stack_size(self.stack_size)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn validate_stack_size(size: usize) -> ThreadResult<()> {
    if !(MIN_STACK_SIZE..=MAX_STACK_SIZE).contains(&size) {
        return Err(SpawnError::InvalidStackSize(size).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::InvalidOperationError;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.is_preemptive());
        assert_eq!(config.get_period(), Duration::from_millis(10));
        assert_eq!(config.get_stack_size(), DEFAULT_STACK_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("8192"), 8192);
        assert_eq!(parse_size("0065536"), 65536);
    }

    #[test]
    fn test_zero_period_rejected_only_when_preemptive() {
        let config = Config::new().period(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ThreadError::InvalidOperation(InvalidOperationError::InvalidConfig(_)))
        ));
        assert!(Config::cooperative().period(Duration::ZERO).validate().is_ok());
    }

    #[test]
    fn test_stack_size_bounds() {
        assert_eq!(
            Config::new().stack_size(1024).validate(),
            Err(ThreadError::from(SpawnError::InvalidStackSize(1024)))
        );
        assert!(Config::new().stack_size(MIN_STACK_SIZE).validate().is_ok());
        assert!(Config::new().stack_size(MAX_STACK_SIZE + 1).validate().is_err());
    }
}
