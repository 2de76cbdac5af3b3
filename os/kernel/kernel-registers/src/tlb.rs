//! TLB maintenance.

use kernel_memory_addresses::VirtualAddress;

/// Invalidate the TLB entry of the page containing `va`.
///
/// # Safety
/// Ring 0 only.
#[cfg(all(feature = "asm", target_arch = "x86"))]
#[inline]
pub unsafe fn invlpg(va: VirtualAddress) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u32(), options(nostack, preserves_flags));
    }
}

/// Host builds have no TLB to maintain.
///
/// # Safety
/// Always safe; `unsafe` only to match the target signature.
#[cfg(not(all(feature = "asm", target_arch = "x86")))]
#[inline]
pub const unsafe fn invlpg(va: VirtualAddress) {
    let _ = va;
}
