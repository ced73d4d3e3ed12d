//! Scenario tests running real runtimes.

pub(crate) mod helpers;
