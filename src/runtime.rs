//! Runtime coordinating green threads on one OS thread.
//!
//! The OS thread that calls [`crate::init`] becomes the main green thread
//! and owns a `Runtime`: the ready queue, the registry of thread control
//! blocks, the stack pool and the preemption timer. Every other operation
//! finds the runtime through a thread-local pointer, so separate OS threads
//! may each run an independent runtime.

use crate::arch::{Arch, DefaultArch, SavedContext};
use crate::config::Config;
use crate::errors::{fatal, InvalidOperationError, JoinError, ThreadError, ThreadResult};
use crate::mem::{Stack, StackPool};
use crate::platform_timer::{unblock_preemption, PreemptGuard, PreemptionTimer};
use crate::sched::{DefaultScheduler, Scheduler};
use crate::thread::{ExitStatus, ExitValue, Tcb, Thread, ThreadEntry, ThreadId, ThreadState};
use portable_atomic::{AtomicU64, AtomicUsize, Ordering};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

/// Next thread ID to assign. Shared by all runtimes; starts from 1, never 0.
static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(1);

fn next_thread_id() -> ThreadId {
    let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    // SAFETY: the counter starts at 1 and would need usize::MAX spawns to wrap.
    unsafe { ThreadId::new_unchecked(id) }
}

thread_local! {
    /// Runtime of this OS thread, read by the signal handler.
    static CURRENT_RUNTIME: Cell<*const Runtime> = const { Cell::new(ptr::null()) };
    /// Owning slot, torn down when the OS thread exits.
    static RUNTIME_OWNER: RefCell<Option<RuntimeOwner>> = const { RefCell::new(None) };
}

struct RuntimeOwner {
    timer: Option<PreemptionTimer>,
    runtime: Box<Runtime>,
}

impl Drop for RuntimeOwner {
    fn drop(&mut self) {
        let _guard = PreemptGuard::new();
        self.timer.take();
        let _ = CURRENT_RUNTIME.try_with(|current| current.set(ptr::null()));
        log::debug!(
            "runtime torn down after {} context switches",
            self.runtime.context_switches.load(Ordering::Relaxed)
        );
    }
}

/// Create the runtime for the calling OS thread.
pub(crate) fn install(config: Config) -> ThreadResult<()> {
    config.validate()?;
    RUNTIME_OWNER.with(|owner| {
        let mut owner = owner.borrow_mut();
        if owner.is_some() {
            return Err(InvalidOperationError::AlreadyInitialized.into());
        }

        let runtime = Box::new(Runtime::new(config));
        CURRENT_RUNTIME.with(|current| current.set(&*runtime as *const Runtime));

        let timer = if runtime.config.preemption {
            match PreemptionTimer::start(runtime.config.period) {
                Ok(timer) => Some(timer),
                Err(error) => {
                    CURRENT_RUNTIME.with(|current| current.set(ptr::null()));
                    log::warn!("failed to start preemption timer: {}", error);
                    return Err(error.into());
                }
            }
        } else {
            None
        };

        log::debug!(
            "runtime initialized: main thread {}, period {:?}, preemption {}",
            runtime.main,
            runtime.config.period,
            if timer.is_some() { "on" } else { "off" }
        );
        *owner = Some(RuntimeOwner { timer, runtime });
        Ok(())
    })
}

/// Runtime of the calling OS thread.
pub(crate) fn current_runtime() -> ThreadResult<&'static Runtime> {
    let runtime = CURRENT_RUNTIME.with(Cell::get);
    if runtime.is_null() {
        Err(ThreadError::not_initialized())
    } else {
        // SAFETY: the pointer is cleared before the owning box is dropped,
        // which only happens when this OS thread exits.
        Ok(unsafe { &*runtime })
    }
}

/// Entry point of a preemption tick, called from the signal handler.
pub(crate) fn on_preemption_tick() {
    let runtime = CURRENT_RUNTIME.try_with(Cell::get).unwrap_or(ptr::null());
    if !runtime.is_null() {
        // SAFETY: see `current_runtime`.
        unsafe { &*runtime }.preempt();
    }
}

/// First frame of every spawned thread.
///
/// Entered with preemption blocked, as left by the switch that selected the
/// thread for the first time.
extern "C" fn thread_start(id: usize) -> ! {
    let runtime = match current_runtime() {
        Ok(runtime) => runtime,
        Err(_) => fatal("thread started without a runtime"),
    };
    let entry = runtime.take_entry(id);
    unblock_preemption();

    let status = match panic::catch_unwind(AssertUnwindSafe(entry)) {
        Ok(value) => ExitStatus::Returned(value),
        Err(payload) => ExitStatus::Panicked(payload),
    };
    runtime.exit_current(status)
}

/// Counters describing a runtime's activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeStats {
    /// Threads in the ready queue, including the running one
    pub live: usize,
    /// Threads that finished but have not been joined
    pub retired: usize,
    /// Context switches performed
    pub context_switches: u64,
    /// Timer ticks that reached the scheduler
    pub preemptions: u64,
    /// Timer ticks dropped because the scheduler was busy
    pub skipped_ticks: u64,
    /// Stacks mapped from the OS
    pub stacks_allocated: usize,
    /// Stacks served from the pool's cache
    pub stacks_reused: usize,
}

/// Snapshot of one thread, as listed by [`crate::threads`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub thread: Thread,
    pub name: Option<String>,
    pub state: ThreadState,
}

struct RuntimeState {
    scheduler: DefaultScheduler,
    threads: BTreeMap<ThreadId, Box<Tcb>>,
    /// Every ID this runtime handed out. An issued ID missing from
    /// `threads` belongs to a thread that was already joined.
    issued: IdRanges,
    /// Stacks of retired threads, released outside the signal handler.
    /// Capacity always covers every registered thread.
    graveyard: Vec<Stack>,
}

/// Set of thread IDs stored as sorted, disjoint, non-adjacent ranges.
///
/// IDs come from one counter shared by every runtime, so the IDs a single
/// runtime issues are contiguous except where another runtime spawned in
/// between. Storage grows with those interleavings, not with the number of
/// threads.
#[derive(Debug, Default)]
struct IdRanges {
    /// Inclusive `(first, last)` pairs in ascending order.
    ranges: Vec<(usize, usize)>,
}

impl IdRanges {
    /// Record `id`. IDs must be inserted in increasing order.
    fn push(&mut self, id: ThreadId) {
        let id = id.get();
        if let Some((_, last)) = self.ranges.last_mut() {
            debug_assert!(*last < id, "thread id {} issued out of order", id);
            if *last + 1 == id {
                *last = id;
                return;
            }
        }
        self.ranges.push((id, id));
    }

    fn contains(&self, id: ThreadId) -> bool {
        let id = id.get();
        let after = self.ranges.partition_point(|&(first, _)| first <= id);
        after > 0 && id <= self.ranges[after - 1].1
    }
}

impl RuntimeState {
    fn tcb_mut(&mut self, id: ThreadId) -> &mut Tcb {
        match self.threads.get_mut(&id) {
            Some(tcb) => tcb,
            None => fatal("ready queue references a thread without a control block"),
        }
    }

    fn running(&self) -> ThreadId {
        match self.scheduler.current() {
            Some(id) => id,
            None => fatal("ready queue is empty while a thread runs"),
        }
    }

    fn switch_out(&mut self, id: ThreadId) -> *mut SavedContext {
        let tcb = self.tcb_mut(id);
        tcb.state = ThreadState::Ready;
        &mut tcb.context
    }

    fn switch_in(&mut self, id: ThreadId) -> *const SavedContext {
        let tcb = self.tcb_mut(id);
        tcb.state = ThreadState::Running;
        &tcb.context
    }
}

/// Scheduler, thread registry and stack pool of one OS thread.
pub(crate) struct Runtime {
    state: spin::Mutex<RuntimeState>,
    stack_pool: StackPool,
    config: Config,
    main: ThreadId,
    context_switches: AtomicU64,
    preemptions: AtomicU64,
    skipped_ticks: AtomicU64,
}

impl Runtime {
    fn new(config: Config) -> Self {
        let main = next_thread_id();
        let mut scheduler = DefaultScheduler::new();
        scheduler.enqueue(main);
        let mut threads = BTreeMap::new();
        threads.insert(main, Box::new(Tcb::main(main)));
        let mut issued = IdRanges::default();
        issued.push(main);

        Self {
            state: spin::Mutex::new(RuntimeState {
                scheduler,
                threads,
                issued,
                graveyard: Vec::new(),
            }),
            stack_pool: StackPool::new(config.stack_cache),
            config,
            main,
            context_switches: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn current_id(&self) -> ThreadId {
        let _guard = PreemptGuard::new();
        self.state.lock().running()
    }

    /// Register a new thread at the tail of the ready queue.
    ///
    /// The stack size has already been validated. Failing to map a stack
    /// is fatal.
    pub(crate) fn spawn(&self, entry: ThreadEntry, stack_size: usize, name: Option<String>) -> ThreadId {
        let _guard = PreemptGuard::new();
        self.reap();

        let stack = match self.stack_pool.allocate(stack_size) {
            Some(stack) => stack,
            None => fatal("unable to allocate a thread stack"),
        };
        let id = next_thread_id();
        let stack_bottom = stack.stack_bottom();
        let mut tcb = Box::new(Tcb::new(id, name, entry, stack));
        // SAFETY: the stack is owned by the TCB and outlives the context.
        unsafe { DefaultArch::init_context(&mut tcb.context, stack_bottom, thread_start, id.get()) };

        log::debug!("spawned thread {} ({}) with a {} byte stack", id, tcb.display_name(), stack_size);

        let mut state = self.state.lock();
        state.issued.push(id);
        state.threads.insert(id, tcb);
        state.scheduler.enqueue(id);
        // Retiring a thread must not allocate.
        let registered = state.threads.len();
        state.graveyard.reserve(registered);
        id
    }

    /// Give up the rest of the timeslice.
    ///
    /// With no other ready thread this returns immediately without a switch.
    pub(crate) fn yield_now(&self) {
        let _guard = PreemptGuard::new();
        let state = self.state.lock();
        self.switch_from(state);
    }

    /// Timer tick. Runs in signal context: no allocation, no logging.
    fn preempt(&self) {
        let _guard = PreemptGuard::new();
        match self.state.try_lock() {
            Some(state) => {
                self.preemptions.fetch_add(1, Ordering::Relaxed);
                self.switch_from(state);
            }
            None => {
                self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Rotate the queue and switch to its new front.
    ///
    /// Must be called with preemption blocked; the caller's guard stays alive
    /// across the switch and is dropped when this thread resumes.
    fn switch_from(&self, mut guard: spin::MutexGuard<'_, RuntimeState>) {
        let state = &mut *guard;
        let Some((previous, next)) = state.scheduler.rotate() else {
            return;
        };
        let prev_ctx = state.switch_out(previous);
        let next_ctx = state.switch_in(next);
        drop(guard);

        self.context_switches.fetch_add(1, Ordering::Relaxed);
        // SAFETY: both contexts live in boxed TCBs that stay registered until
        // joined, and the next context was saved by a switch or init_context.
        unsafe { DefaultArch::context_switch(prev_ctx, next_ctx) };
    }

    fn take_entry(&self, id: usize) -> ThreadEntry {
        self.reap();
        let _guard = PreemptGuard::new();
        let mut state = self.state.lock();
        let current = state.running();
        debug_assert_eq!(current.get(), id, "started thread is not at the front of the queue");
        match state.tcb_mut(current).entry.take() {
            Some(entry) => entry,
            None => fatal("thread entry already taken"),
        }
    }

    /// Retire the running thread and switch away for good.
    ///
    /// When the last thread retires the process exits with status 0.
    pub(crate) fn exit_current(&self, status: ExitStatus) -> ! {
        let _guard = PreemptGuard::new();
        self.reap();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let current = state.running();
        let next = state.scheduler.retire_current();

        let tcb = state.tcb_mut(current);
        log::debug!("thread {} ({}) {}", current, tcb.display_name(), status.describe());
        if let Some(stack) = tcb.retire(status) {
            state.graveyard.push(stack);
        }
        let prev_ctx: *mut SavedContext = &mut state.tcb_mut(current).context;

        let Some(next) = next else {
            drop(guard);
            log::debug!("last thread retired, exiting process");
            std::process::exit(0);
        };
        let next_ctx = state.switch_in(next);
        drop(guard);

        self.context_switches.fetch_add(1, Ordering::Relaxed);
        // SAFETY: as in `switch_from`. The retired stack stays mapped until a
        // later reap, which always runs on another thread.
        unsafe { DefaultArch::context_switch(prev_ctx, next_ctx) };
        fatal("retired thread was resumed")
    }

    /// Wait for `target` to retire and take its result.
    pub(crate) fn join(&self, target: ThreadId) -> ThreadResult<ExitValue> {
        let me = self.current_id();
        if me == target {
            return Err(JoinError::JoinSelf.into());
        }

        loop {
            {
                let _guard = PreemptGuard::new();
                let mut guard = self.state.lock();
                let state = &mut *guard;
                let Some(tcb) = state.threads.get_mut(&target) else {
                    return Err(if state.issued.contains(target) {
                        JoinError::AlreadyJoined.into()
                    } else {
                        JoinError::InvalidHandle.into()
                    });
                };
                if matches!(tcb.joiner, Some(joiner) if joiner != me) {
                    return Err(JoinError::AlreadyJoined.into());
                }
                tcb.joiner = Some(me);

                if tcb.state == ThreadState::Exited {
                    let Some(mut tcb) = state.threads.remove(&target) else {
                        fatal("joined thread vanished from the registry");
                    };
                    drop(guard);

                    let status = match tcb.result.take() {
                        Some(status) => status,
                        None => fatal("retired thread has no result"),
                    };
                    log::debug!("thread {} joined thread {} ({})", me, target, status.describe());
                    return status.into_result();
                }
            }
            self.yield_now();
        }
    }

    /// Stop `target` immediately.
    ///
    /// Cancelling the calling thread behaves like `exit` with a cancelled
    /// result. Cancelling an already retired thread is a no-op.
    pub(crate) fn cancel(&self, target: ThreadId) -> ThreadResult<()> {
        let me = self.current_id();
        if target == me {
            self.exit_current(ExitStatus::Cancelled);
        }
        if target == self.main {
            return Err(InvalidOperationError::MainThread.into());
        }

        let entry = {
            let _guard = PreemptGuard::new();
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(tcb) = state.threads.get_mut(&target) else {
                return Err(JoinError::InvalidHandle.into());
            };
            if tcb.state == ThreadState::Exited {
                return Ok(());
            }

            let entry = tcb.entry.take();
            if let Some(stack) = tcb.retire(ExitStatus::Cancelled) {
                state.graveyard.push(stack);
            }
            state.scheduler.remove(target);
            for tcb in state.threads.values_mut() {
                if tcb.joiner == Some(target) {
                    tcb.joiner = None;
                }
            }
            log::debug!("thread {} cancelled thread {}", me, target);
            entry
        };

        // A thread cancelled before it ever ran still owns its closure.
        drop(entry);
        self.reap();
        Ok(())
    }

    /// State of `id`, or `None` once it has been joined or if it never existed.
    pub(crate) fn state_of(&self, id: ThreadId) -> Option<ThreadState> {
        let _guard = PreemptGuard::new();
        self.state.lock().threads.get(&id).map(|tcb| tcb.state)
    }

    pub(crate) fn stats(&self) -> RuntimeStats {
        let (live, retired) = {
            let _guard = PreemptGuard::new();
            let state = self.state.lock();
            let live = state.scheduler.len();
            (live, state.threads.len() - live)
        };
        let (stacks_allocated, stacks_reused, _) = self.stack_pool.stats();

        RuntimeStats {
            live,
            retired,
            context_switches: self.context_switches.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            stacks_allocated,
            stacks_reused,
        }
    }

    #[cfg(test)]
    pub(crate) fn issued_ranges(&self) -> usize {
        let _guard = PreemptGuard::new();
        self.state.lock().issued.ranges.len()
    }

    /// Live threads in dispatch order, followed by unjoined retired threads.
    pub(crate) fn threads(&self) -> Vec<ThreadInfo> {
        let _guard = PreemptGuard::new();
        let state = self.state.lock();
        let info = |tcb: &Tcb| ThreadInfo {
            thread: Thread::from_id(tcb.id),
            name: tcb.name.clone(),
            state: tcb.state,
        };

        let mut listing: Vec<ThreadInfo> = state
            .scheduler
            .threads()
            .into_iter()
            .filter_map(|id| state.threads.get(&id).map(|tcb| info(tcb)))
            .collect();
        listing.extend(
            state
                .threads
                .values()
                .filter(|tcb| tcb.state == ThreadState::Exited)
                .map(|tcb| info(tcb)),
        );
        listing
    }

    /// Return stacks of retired threads to the pool.
    ///
    /// Never called from the signal handler, and never with the caller's own
    /// stack in the graveyard. Does not allocate.
    fn reap(&self) {
        loop {
            let stack = {
                let _guard = PreemptGuard::new();
                self.state.lock().graveyard.pop()
            };
            let Some(stack) = stack else {
                return;
            };
            log::trace!("releasing a {} byte stack", stack.size());
            self.stack_pool.release(stack);
        }
    }
}
