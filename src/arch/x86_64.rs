//! x86_64 (System V ABI) context switching.
//!
//! The switch pushes the callee-saved registers and the SSE/x87 control words
//! onto the current stack, stores the stack pointer into the previous
//! context, loads the next stack pointer and pops the same frame back.

use super::{Arch, ContextEntry};
use core::arch::global_asm;

/// Default MXCSR (all exceptions masked) in the low half, default x87
/// control word in bits 32..48.
const FP_CONTROL_DEFAULTS: u64 = (0x037f << 32) | 0x1f80;

global_asm!(
    ".text",
    ".global green_threads_context_switch",
    ".type green_threads_context_switch, @function",
    ".p2align 4",
    "green_threads_context_switch:",
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "sub rsp, 8",
    "stmxcsr dword ptr [rsp]",
    "fnstcw word ptr [rsp + 4]",
    "mov qword ptr [rdi], rsp",
    "mov rsp, qword ptr [rsi]",
    "ldmxcsr dword ptr [rsp]",
    "fldcw word ptr [rsp + 4]",
    "add rsp, 8",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
    ".size green_threads_context_switch, . - green_threads_context_switch",
    "",
    ".global green_threads_bootstrap",
    ".type green_threads_bootstrap, @function",
    ".p2align 4",
    "green_threads_bootstrap:",
    ".cfi_startproc",
    ".cfi_undefined rip",
    "mov rdi, r12",
    "call r13",
    "ud2",
    ".cfi_endproc",
    ".size green_threads_bootstrap, . - green_threads_bootstrap",
);

extern "C" {
    fn green_threads_context_switch(prev: *mut X86_64Context, next: *const X86_64Context);
    fn green_threads_bootstrap();
}

/// x86_64 architecture implementation.
pub struct X86_64Arch;

/// Saved x86_64 context.
///
/// Everything else lives in the frame `rsp` points at.
#[repr(C)]
#[derive(Debug, Default)]
pub struct X86_64Context {
    /// Stack pointer at the time of the last switch away
    pub rsp: usize,
}

impl Arch for X86_64Arch {
    type SavedContext = X86_64Context;

    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext) {
        unsafe { green_threads_context_switch(prev, next) }
    }

    unsafe fn init_context(
        ctx: &mut Self::SavedContext,
        stack_bottom: *mut u8,
        entry: ContextEntry,
        arg: usize,
    ) {
        // Frame popped by the first switch into this context, lowest address
        // first. The return slot sits 8 bytes below a 16-byte boundary so the
        // bootstrap's `call` sees an ABI-aligned stack.
        let frame: [u64; 8] = [
            FP_CONTROL_DEFAULTS,
            0,                                       // r15
            0,                                       // r14
            entry as *const () as u64,               // r13
            arg as u64,                              // r12
            0,                                       // rbx
            0,                                       // rbp
            green_threads_bootstrap as *const () as u64, // return address
        ];

        let top = (stack_bottom as usize) & !0xf;
        let sp = (top - 8 * frame.len()) as *mut u64;
        for (i, word) in frame.iter().enumerate() {
            unsafe { sp.add(i).write(*word) };
        }
        ctx.rsp = sp as usize;
    }
}
