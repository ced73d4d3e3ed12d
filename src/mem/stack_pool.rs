//! Stack pool allocator for thread stacks.
//!
//! Every stack is an independent allocation owned by exactly one TCB. With
//! the `guard-pages` feature the region is mapped with `mmap` and the page
//! below the usable area is made inaccessible, so an overflow faults instead
//! of corrupting a neighbour. Reaped stacks go back to a bounded free list.

use portable_atomic::{AtomicUsize, Ordering};
use spin::Mutex;
use std::ptr::NonNull;

/// Value written at the lowest usable word of every stack.
pub const STACK_CANARY: u64 = 0xDEAD_BEEF_CAFE_BABE;

const STACK_ALIGN: usize = 16;

/// A thread stack with an optional guard page.
pub struct Stack {
    /// Start of the allocation (the guard page when present)
    memory: NonNull<u8>,
    /// Length of the whole allocation
    mapping_len: usize,
    /// Usable stack size (excluding the guard page)
    usable_size: usize,
    /// Size of the guard page, 0 without one
    guard_size: usize,
}

impl Stack {
    /// Get the usable stack size in bytes.
    pub fn size(&self) -> usize {
        self.usable_size
    }

    pub fn has_guard_page(&self) -> bool {
        self.guard_size != 0
    }

    /// Get a pointer to the bottom of the stack (highest address, aligned).
    ///
    /// Stacks grow downwards, so this is where a fresh context starts.
    pub fn stack_bottom(&self) -> *mut u8 {
        let end = self.memory.as_ptr() as usize + self.mapping_len;
        (end & !(STACK_ALIGN - 1)) as *mut u8
    }

    /// Get a pointer to the top of the stack (lowest usable address).
    pub fn stack_top(&self) -> *mut u8 {
        unsafe { self.memory.as_ptr().add(self.guard_size) }
    }

    /// Check whether `addr` lies inside the usable region.
    pub fn contains(&self, addr: usize) -> bool {
        let top = self.stack_top() as usize;
        addr >= top && addr < top + self.usable_size
    }

    /// Install the canary value for overflow detection.
    pub fn install_canary(&self, canary: u64) {
        let canary_location = self.stack_top() as *mut u64;
        unsafe { canary_location.write(canary) };
    }

    /// Check if the stack canary is still intact.
    pub fn check_canary(&self, expected_canary: u64) -> bool {
        let canary_location = self.stack_top() as *const u64;
        unsafe { canary_location.read() == expected_canary }
    }

    #[cfg(feature = "guard-pages")]
    fn map(usable_size: usize) -> Option<Self> {
        let page = page_size();
        let usable_size = round_up(usable_size, page);
        let mapping_len = usable_size + page;

        let memory = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapping_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                -1,
                0,
            )
        };
        if memory == libc::MAP_FAILED {
            return None;
        }
        if unsafe { libc::mprotect(memory, page, libc::PROT_NONE) } != 0 {
            unsafe { libc::munmap(memory, mapping_len) };
            return None;
        }

        Some(Self {
            memory: NonNull::new(memory as *mut u8)?,
            mapping_len,
            usable_size,
            guard_size: page,
        })
    }

    #[cfg(not(feature = "guard-pages"))]
    fn map(usable_size: usize) -> Option<Self> {
        use std::alloc::{alloc, Layout};

        let usable_size = round_up(usable_size, STACK_ALIGN);
        let layout = Layout::from_size_align(usable_size, STACK_ALIGN).ok()?;
        let memory = NonNull::new(unsafe { alloc(layout) })?;

        Some(Self {
            memory,
            mapping_len: usable_size,
            usable_size,
            guard_size: 0,
        })
    }
}

impl Drop for Stack {
    #[cfg(feature = "guard-pages")]
    fn drop(&mut self) {
        unsafe { libc::munmap(self.memory.as_ptr().cast(), self.mapping_len) };
    }

    #[cfg(not(feature = "guard-pages"))]
    fn drop(&mut self) {
        use std::alloc::{dealloc, Layout};

        if let Ok(layout) = Layout::from_size_align(self.mapping_len, STACK_ALIGN) {
            unsafe { dealloc(self.memory.as_ptr(), layout) };
        }
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("top", &self.stack_top())
            .field("size", &self.usable_size)
            .field("guard_page", &self.has_guard_page())
            .finish()
    }
}

fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

#[cfg(feature = "guard-pages")]
fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
}

/// Pool-based allocator for thread stacks.
///
/// Keeps up to `capacity` released stacks and hands them out again before
/// mapping new memory.
pub struct StackPool {
    /// Released stacks waiting for reuse
    free_stacks: Mutex<Vec<Stack>>,
    /// Maximum length of the free list
    capacity: usize,
    /// Statistics counters
    stats: StackPoolStats,
}

#[derive(Debug, Default)]
struct StackPoolStats {
    /// Number of stacks mapped
    allocated: AtomicUsize,
    /// Number of stacks handed out from the free list
    reused: AtomicUsize,
    /// Number of stacks currently owned by threads
    in_use: AtomicUsize,
}

impl StackPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free_stacks: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            stats: StackPoolStats::default(),
        }
    }

    /// Allocate a stack with at least `size` usable bytes.
    ///
    /// The canary is installed before the stack is returned.
    ///
    /// # Returns
    ///
    /// A new stack, or `None` if the memory could not be obtained.
    pub fn allocate(&self, size: usize) -> Option<Stack> {
        let reused = {
            let mut free_list = self.free_stacks.lock();
            free_list
                .iter()
                .position(|stack| stack.size() >= size)
                .map(|index| free_list.swap_remove(index))
        };

        let stack = match reused {
            Some(stack) => {
                log::trace!("reusing stack {:?}", stack);
                self.stats.reused.fetch_add(1, Ordering::Relaxed);
                stack
            }
            None => {
                let stack = Stack::map(size)?;
                self.stats.allocated.fetch_add(1, Ordering::Relaxed);
                stack
            }
        };

        stack.install_canary(STACK_CANARY);
        self.stats.in_use.fetch_add(1, Ordering::Relaxed);
        Some(stack)
    }

    /// Return a stack to the pool.
    ///
    /// A stack whose canary was overwritten is unmapped rather than reused.
    pub fn release(&self, stack: Stack) {
        self.stats.in_use.fetch_sub(1, Ordering::Relaxed);

        if !stack.check_canary(STACK_CANARY) {
            log::warn!("stack canary corrupted, discarding {:?}", stack);
            return;
        }

        let mut free_list = self.free_stacks.lock();
        if free_list.len() < self.capacity {
            free_list.push(stack);
        }
    }

    /// Get statistics about the stack pool: (allocated, reused, in use).
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.allocated.load(Ordering::Relaxed),
            self.stats.reused.load(Ordering::Relaxed),
            self.stats.in_use.load(Ordering::Relaxed),
        )
    }

    /// Number of stacks currently cached.
    pub fn cached(&self) -> usize {
        self.free_stacks.lock().len()
    }
}
