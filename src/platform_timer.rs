//! Timer-driven preemption for the Linux host.
//!
//! A POSIX timer on the owning OS thread's CPU-time clock delivers
//! `SIGVTALRM` to that OS thread every timeslice. The handler asks the
//! runtime to advance to the next ready thread. Scheduler state is only ever
//! mutated inside a [`PreemptGuard`], so the handler never observes it
//! half-updated.

use crate::errors::TimerError;
use core::marker::PhantomData;
use core::time::Duration;
use std::{mem, ptr};

/// Signal used for preemption ticks.
pub const PREEMPT_SIGNAL: libc::c_int = libc::SIGVTALRM;

/// Process-wide handler installation, shared by every runtime.
static HANDLER: spin::Once<Result<(), TimerError>> = spin::Once::new();

fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

fn preempt_sigset() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, PREEMPT_SIGNAL);
        set
    }
}

/// Signal handler for preemption ticks.
///
/// Runs with `PREEMPT_SIGNAL` blocked. It may switch to another thread and
/// only return once this thread is scheduled again, so `errno` is preserved
/// across the whole excursion.
extern "C" fn preempt_handler(_signal: libc::c_int) {
    let saved_errno = errno();
    crate::runtime::on_preemption_tick();
    unsafe { *libc::__errno_location() = saved_errno };
}

fn install_handler() -> Result<(), TimerError> {
    HANDLER
        .call_once(|| {
            let handler: extern "C" fn(libc::c_int) = preempt_handler;
            unsafe {
                let mut action: libc::sigaction = mem::zeroed();
                action.sa_sigaction = handler as *const () as libc::sighandler_t;
                action.sa_flags = libc::SA_RESTART;
                action.sa_mask = preempt_sigset();
                if libc::sigaction(PREEMPT_SIGNAL, &action, ptr::null_mut()) != 0 {
                    return Err(TimerError::SignalInstall(errno()));
                }
            }
            Ok(())
        })
        .clone()
}

fn current_tid() -> libc::pid_t {
    unsafe { libc::syscall(libc::SYS_gettid) as libc::pid_t }
}

/// Interval timer measuring the CPU time of the OS thread that created it.
///
/// `CLOCK_THREAD_CPUTIME_ID` counts time spent in the kernel on behalf of the
/// thread as well as user-mode time, so a thread busy in system calls uses
/// up its timeslice too. There is no per-thread clock for user time alone;
/// `ITIMER_VIRTUAL` has that resolution but is shared by the whole process.
#[derive(Debug)]
pub(crate) struct PreemptionTimer {
    timer: libc::timer_t,
}

impl PreemptionTimer {
    /// Install the handler (once per process) and arm a repeating timer that
    /// signals the calling OS thread every `period` of its CPU time.
    pub(crate) fn start(period: Duration) -> Result<Self, TimerError> {
        install_handler()?;

        let mut event: libc::sigevent = unsafe { mem::zeroed() };
        event.sigev_notify = libc::SIGEV_THREAD_ID;
        event.sigev_signo = PREEMPT_SIGNAL;
        event.sigev_notify_thread_id = current_tid();

        let mut timer: libc::timer_t = ptr::null_mut();
        if unsafe { libc::timer_create(libc::CLOCK_THREAD_CPUTIME_ID, &mut event, &mut timer) } != 0 {
            return Err(TimerError::TimerCreate(errno()));
        }
        // Deleted by Drop if arming fails.
        let timer = Self { timer };

        let interval = libc::timespec {
            tv_sec: period.as_secs() as libc::time_t,
            tv_nsec: period.subsec_nanos() as libc::c_long,
        };
        let spec = libc::itimerspec {
            it_interval: interval,
            it_value: interval,
        };
        if unsafe { libc::timer_settime(timer.timer, 0, &spec, ptr::null_mut()) } != 0 {
            return Err(TimerError::TimerArm(errno()));
        }

        Ok(timer)
    }
}

impl Drop for PreemptionTimer {
    fn drop(&mut self) {
        unsafe { libc::timer_delete(self.timer) };
    }
}

/// Signal-masked critical section.
///
/// While a guard is alive the preemption signal is blocked on this OS
/// thread; a tick that fires in the meantime stays pending and is delivered
/// when the outermost guard is dropped. Guards nest.
///
/// The runtime takes one around every scheduler and registry update. User
/// code can take one to make a sequence of operations atomic with respect
/// to preemption, e.g. around calls into a non-reentrant allocator or I/O.
pub struct PreemptGuard {
    was_blocked: bool,
    _not_send: PhantomData<*const ()>,
}

impl PreemptGuard {
    pub fn new() -> Self {
        let set = preempt_sigset();
        let mut previous: libc::sigset_t = unsafe { mem::zeroed() };
        unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut previous) };
        let was_blocked = unsafe { libc::sigismember(&previous, PREEMPT_SIGNAL) } == 1;
        Self {
            was_blocked,
            _not_send: PhantomData,
        }
    }

    /// Whether dropping this guard re-enables preemption.
    pub fn is_outermost(&self) -> bool {
        !self.was_blocked
    }
}

impl Default for PreemptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        if !self.was_blocked {
            unblock_preemption();
        }
    }
}

/// Unblock the preemption signal on this OS thread.
///
/// A freshly started thread inherits the blocked mask of the switch that
/// brought it in and calls this before running user code.
pub(crate) fn unblock_preemption() {
    let set = preempt_sigset();
    unsafe { libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, ptr::null_mut()) };
}

/// Whether the preemption signal is currently blocked on this OS thread.
pub fn preemption_blocked() -> bool {
    let mut current: libc::sigset_t = unsafe { mem::zeroed() };
    unsafe {
        libc::pthread_sigmask(libc::SIG_BLOCK, ptr::null(), &mut current);
        libc::sigismember(&current, PREEMPT_SIGNAL) == 1
    }
}

/// Run `f` with preemption disabled.
pub fn without_preemption<R>(f: impl FnOnce() -> R) -> R {
    let _guard = PreemptGuard::new();
    f()
}
