//! AArch64 (AAPCS64) context switching.
//!
//! Saves x19-x30, d8-d15 and FPCR in a 176-byte frame on the current stack.

use super::{Arch, ContextEntry};
use core::arch::global_asm;

const FRAME_SIZE: usize = 176;

global_asm!(
    ".text",
    ".global green_threads_context_switch",
    ".type green_threads_context_switch, %function",
    ".p2align 4",
    "green_threads_context_switch:",
    "sub sp, sp, #176",
    "stp x19, x20, [sp, #0]",
    "stp x21, x22, [sp, #16]",
    "stp x23, x24, [sp, #32]",
    "stp x25, x26, [sp, #48]",
    "stp x27, x28, [sp, #64]",
    "stp x29, x30, [sp, #80]",
    "stp d8, d9, [sp, #96]",
    "stp d10, d11, [sp, #112]",
    "stp d12, d13, [sp, #128]",
    "stp d14, d15, [sp, #144]",
    "mrs x9, fpcr",
    "str x9, [sp, #160]",
    "mov x9, sp",
    "str x9, [x0]",
    "ldr x9, [x1]",
    "mov sp, x9",
    "ldr x9, [sp, #160]",
    "msr fpcr, x9",
    "ldp x19, x20, [sp, #0]",
    "ldp x21, x22, [sp, #16]",
    "ldp x23, x24, [sp, #32]",
    "ldp x25, x26, [sp, #48]",
    "ldp x27, x28, [sp, #64]",
    "ldp x29, x30, [sp, #80]",
    "ldp d8, d9, [sp, #96]",
    "ldp d10, d11, [sp, #112]",
    "ldp d12, d13, [sp, #128]",
    "ldp d14, d15, [sp, #144]",
    "add sp, sp, #176",
    "ret",
    ".size green_threads_context_switch, . - green_threads_context_switch",
    "",
    ".global green_threads_bootstrap",
    ".type green_threads_bootstrap, %function",
    ".p2align 4",
    "green_threads_bootstrap:",
    ".cfi_startproc",
    ".cfi_undefined x30",
    "mov x0, x19",
    "blr x20",
    "brk #0x1",
    ".cfi_endproc",
    ".size green_threads_bootstrap, . - green_threads_bootstrap",
);

extern "C" {
    fn green_threads_context_switch(prev: *mut Aarch64Context, next: *const Aarch64Context);
    fn green_threads_bootstrap();
}

/// AArch64 architecture implementation.
pub struct Aarch64Arch;

/// Saved AArch64 context: the stack pointer of the saved frame.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Aarch64Context {
    pub sp: usize,
}

impl Arch for Aarch64Arch {
    type SavedContext = Aarch64Context;

    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext) {
        unsafe { green_threads_context_switch(prev, next) }
    }

    unsafe fn init_context(
        ctx: &mut Self::SavedContext,
        stack_bottom: *mut u8,
        entry: ContextEntry,
        arg: usize,
    ) {
        let mut frame = [0u64; FRAME_SIZE / 8];
        frame[0] = arg as u64; // x19
        frame[1] = entry as *const () as u64; // x20
        frame[11] = green_threads_bootstrap as *const () as u64; // x30

        let top = (stack_bottom as usize) & !0xf;
        let sp = (top - FRAME_SIZE) as *mut u64;
        for (i, word) in frame.iter().enumerate() {
            unsafe { sp.add(i).write(*word) };
        }
        ctx.sp = sp as usize;
    }
}
