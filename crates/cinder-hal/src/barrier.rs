//! # Memory Barriers
//!
//! Ordering between host writes to shared command memory and the register
//! write that tells the device to fetch it.

use core::sync::atomic::{compiler_fence, fence, Ordering};

/// Compiler fence (prevents reordering)
#[inline(always)]
pub fn compiler() {
    compiler_fence(Ordering::SeqCst);
}

/// Make command words visible to the device before it is told to fetch them
#[inline(always)]
pub fn dma_write_barrier() {
    fence(Ordering::SeqCst);

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: This is a memory barrier instruction
        unsafe {
            core::arch::asm!("dsb st", options(nostack, preserves_flags));
        }
    }

    #[cfg(not(target_arch = "aarch64"))]
    compiler();
}
