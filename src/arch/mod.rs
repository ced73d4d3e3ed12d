//! Architecture abstraction layer for context switching.
//!
//! Each supported CPU architecture provides a saved-context type, a routine
//! that prepares a fresh context on top of a thread stack, and the switch
//! itself. Only callee-saved state is captured: a switch is always entered
//! through an ordinary function call, so everything else has already been
//! spilled by the compiler (or by the kernel's signal frame when the switch
//! happens inside the preemption handler).

/// Entry point a fresh context begins executing at.
///
/// Receives the `arg` given to [`Arch::init_context`] and must never return.
pub type ContextEntry = extern "C" fn(usize) -> !;

/// Architecture abstraction trait.
///
/// # Safety
///
/// Implementations manipulate the stack pointer directly. All methods marked
/// as unsafe have specific preconditions that must be upheld by the caller.
pub trait Arch {
    /// Architecture-specific saved context type.
    ///
    /// A default value describes "nothing saved yet"; it becomes valid once a
    /// [`context_switch`](Arch::context_switch) has stored into it.
    type SavedContext: Default;

    /// Save the running context into `prev` and resume `next`.
    ///
    /// Returns only when some other context switches back into `prev`.
    ///
    /// # Safety
    ///
    /// - `prev` must point to a valid SavedContext that stays alive until the
    ///   caller is resumed
    /// - `next` must have been produced by `init_context` or by an earlier
    ///   switch away from a context that has not been resumed since
    /// - The stack behind `next` must still be mapped
    /// - Must be called with the preemption signal blocked
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext);

    /// Prepare `ctx` so that switching into it calls `entry(arg)` on a stack
    /// whose highest usable address is `stack_bottom`.
    ///
    /// # Safety
    ///
    /// `stack_bottom` must be the upper end of a writable region large enough
    /// for the initial frame and everything `entry` will run.
    unsafe fn init_context(
        ctx: &mut Self::SavedContext,
        stack_bottom: *mut u8,
        entry: ContextEntry,
        arg: usize,
    );
}

#[cfg(not(target_os = "linux"))]
compile_error!("green-threads relies on Linux signals and per-thread CPU-time timers.");

#[cfg(target_arch = "x86_64")]
pub mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64::X86_64Arch as DefaultArch;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use self::aarch64::Aarch64Arch as DefaultArch;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("green-threads supports x86_64 and aarch64 only.");

/// Saved context of the host architecture.
pub type SavedContext = <DefaultArch as Arch>::SavedContext;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::StackPool;
    use core::cell::Cell;
    use core::ptr;

    thread_local! {
        static CONTEXTS: Cell<(*mut SavedContext, *mut SavedContext)> =
            const { Cell::new((ptr::null_mut(), ptr::null_mut())) };
        static HITS: Cell<usize> = const { Cell::new(0) };
    }

    extern "C" fn bounce(step: usize) -> ! {
        loop {
            HITS.with(|hits| hits.set(hits.get() + step));
            let (origin, own) = CONTEXTS.with(Cell::get);
            unsafe { DefaultArch::context_switch(own, origin) };
        }
    }

    #[test]
    fn test_switch_round_trips_through_fresh_stack() {
        let pool = StackPool::new(1);
        let stack = pool.allocate(64 * 1024).expect("stack");

        let mut origin = SavedContext::default();
        let mut child = SavedContext::default();
        unsafe { DefaultArch::init_context(&mut child, stack.stack_bottom(), bounce, 5) };
        CONTEXTS.with(|c| c.set((&mut origin as *mut _, &mut child as *mut _)));

        unsafe { DefaultArch::context_switch(&mut origin, &child) };
        assert_eq!(HITS.with(Cell::get), 5);

        unsafe { DefaultArch::context_switch(&mut origin, &child) };
        assert_eq!(HITS.with(Cell::get), 10);
    }

    #[test]
    fn test_callee_saved_state_survives_switch() {
        let pool = StackPool::new(1);
        let stack = pool.allocate(64 * 1024).expect("stack");

        let mut origin = SavedContext::default();
        let mut child = SavedContext::default();
        unsafe { DefaultArch::init_context(&mut child, stack.stack_bottom(), bounce, 1) };
        CONTEXTS.with(|c| c.set((&mut origin as *mut _, &mut child as *mut _)));

        let mut acc = 0u64;
        let mut scale = 1.5f64;
        for round in 1..=4u64 {
            acc = acc.wrapping_mul(31).wrapping_add(round);
            scale *= 2.0;
            unsafe { DefaultArch::context_switch(&mut origin, &child) };
        }
        assert_eq!(acc, 31810);
        assert_eq!(scale, 24.0);
    }
}
