//! Thread scheduler implementations.
//!
//! Provides the round-robin ready queue that drives thread dispatch.

pub mod rr;
pub mod trait_def;

pub use rr::RoundRobinScheduler;
pub use trait_def::Scheduler;

/// Default scheduler type.
pub type DefaultScheduler = RoundRobinScheduler;
