//! Test helper utilities.
//!
//! A runtime is bound to the OS thread that created it, so every scenario
//! runs on a fresh OS thread and owns an independent runtime.

use crate::config::Config;
use core::time::Duration;
use std::env;
use std::panic;
use std::process::{Command, Output};
use std::thread;

/// Names the test a re-executed test binary is running as a child process.
const CHILD_SCENARIO_VAR: &str = "GREEN_THREADS_CHILD_SCENARIO";

/// Stack size for threads interrupted by preemption ticks, which push a
/// signal frame onto the green stack.
pub(crate) const PREEMPTIVE_STACK_SIZE: usize = 64 * 1024;

/// Run `scenario` as the main green thread of a runtime built from `config`.
///
/// Panics in the scenario are propagated to the calling test.
pub(crate) fn run_with<F>(config: Config, scenario: F)
where
    F: FnOnce() + Send + 'static,
{
    let os_thread = thread::Builder::new()
        .name("green-threads-test".into())
        .spawn(move || {
            crate::init_with(config).expect("failed to initialize runtime");
            scenario();
        })
        .expect("failed to spawn OS thread");

    if let Err(payload) = os_thread.join() {
        panic::resume_unwind(payload);
    }
}

/// Run `scenario` without a preemption timer, at the default stack size.
pub(crate) fn run_cooperative<F>(scenario: F)
where
    F: FnOnce() + Send + 'static,
{
    run_with(Config::cooperative(), scenario);
}

/// Run `scenario` with a preemption tick every `period` of CPU time.
///
/// Green threads in such a scenario must not allocate or print outside a
/// `PreemptGuard`.
pub(crate) fn run_preemptive<F>(period: Duration, scenario: F)
where
    F: FnOnce() + Send + 'static,
{
    run_with(Config::new().period(period).stack_size(PREEMPTIVE_STACK_SIZE), scenario);
}

/// Run `scenario` on a fresh OS thread that never initializes a runtime.
pub(crate) fn run_uninitialized<F>(scenario: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(payload) = thread::spawn(scenario).join() {
        panic::resume_unwind(payload);
    }
}

/// Whether this process is the child started by [`run_in_child`] for `test`.
pub(crate) fn in_child_scenario(test: &str) -> bool {
    env::var(CHILD_SCENARIO_VAR).as_deref() == Ok(test)
}

/// Re-run the test binary with only `test` selected, marked as the child.
///
/// For scenarios that end the process, such as the main thread exiting.
/// Output is not captured by the harness so the child's stdout can be
/// inspected.
pub(crate) fn run_in_child(test: &str) -> Output {
    let binary = env::current_exe().expect("failed to locate test binary");
    Command::new(binary)
        .args([test, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_SCENARIO_VAR, test)
        .output()
        .expect("failed to run child test process")
}
