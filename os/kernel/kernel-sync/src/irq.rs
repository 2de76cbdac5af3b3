//! Interrupt flag handling.
//!
//! On a freestanding 32-bit x86 target this executes `pushfd`/`cli`/`sti`.
//! Hosted builds (unit tests) have no business touching the interrupt flag,
//! so there the guard only tracks nesting state and never changes anything.

/// `IF` bit of `EFLAGS`.
pub const EFLAGS_IF: u32 = 1 << 9;

/// Disables hardware interrupts (`cli`).
///
/// # Safety & Privilege
///
/// Must only be called in contexts where `cli` is permitted.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[inline]
pub fn cli_stop_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
}

/// Enables hardware interrupts (`sti`).
///
/// # Safety & Privilege
///
/// Must only be called in contexts where `sti` is permitted.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[inline]
pub fn sti_enable_interrupts() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
}

/// Returns the current `EFLAGS` value (via `pushfd/pop`).
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[inline]
#[must_use]
pub fn eflags() -> u32 {
    let r: u32;
    unsafe { core::arch::asm!("pushfd; pop {}", out(reg) r, options(preserves_flags)) }
    r
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
#[inline]
pub const fn cli_stop_interrupts() {}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
#[inline]
pub const fn sti_enable_interrupts() {}

/// Hosted builds report interrupts as disabled.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
#[inline]
#[must_use]
pub const fn eflags() -> u32 {
    0
}

/// Disable interrupts and halt forever.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn halt_forever() -> ! {
    cli_stop_interrupts();
    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) }
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the `IF` bit. If interrupts were enabled, it
/// executes `cli`. On drop, it executes `sti` **only** if they were previously
/// enabled, so guards nest.
///
/// ```
/// use kernel_sync::IrqGuard;
///
/// let outer = IrqGuard::new();
/// {
///     let _inner = IrqGuard::new();
///     // critical section
/// }
/// drop(outer);
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = (eflags() & EFLAGS_IF) != 0;
        if enabled {
            cli_stop_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }

    /// Whether dropping this guard re-enables interrupts.
    #[inline]
    #[must_use]
    pub const fn restores_interrupts(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            sti_enable_interrupts();
        }
    }
}
