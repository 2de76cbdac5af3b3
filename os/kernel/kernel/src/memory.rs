//! Boot-time memory bring-up, generic over the [`Mmu`] so it runs on the host.

use crate::tracing::{log_memory_map, log_regions};
use kernel_alloc::{
    BootMapError, BootMapping, ProcessError, ProcessSpace, RamError, RegionFrames, RegionTable,
    add_boot_regions, build_kernel_map,
};
use kernel_info::boot::BootMemoryRegion;
use kernel_info::memory::VirtualLayout;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::{Mmu, TempWindow};
use log::info;

/// Pages of the stack mapped by [`self_check`].
const CHECK_STACK_PAGES: u32 = 4;

#[derive(Debug, thiserror::Error)]
pub enum MemoryInitError {
    #[error("memory map rejected: {0}")]
    MemoryMap(RamError),
    #[error(transparent)]
    BootMap(#[from] BootMapError),
}

#[derive(Debug, thiserror::Error)]
pub enum SelfCheckError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("{leaked} pages not returned by the process teardown")]
    Leak { leaked: u32 },
}

/// End of the kernel image: the later of what the boot stub reports and what
/// the linker placed, so a stub that only counts file bytes cannot leave
/// `.bss` unmapped.
#[must_use]
pub fn image_end(reported: PhysicalAddress, linked: PhysicalAddress) -> PhysicalAddress {
    reported.max(linked)
}

/// Register `map` with `ram`, build the boot directory, enable paging and open
/// the temporary window.
///
/// # Errors
/// - [`MemoryInitError::MemoryMap`] if no extent of `map` is usable,
/// - [`MemoryInitError::BootMap`] if the boot directory cannot be built.
///
/// # Safety
/// As [`build_kernel_map`]: everything the caller touches afterwards must be
/// identity mapped.
pub unsafe fn init_memory<M: Mmu>(
    ram: &mut RegionTable<'_>,
    mmu: &M,
    window: &TempWindow,
    map: &[BootMemoryRegion],
    kernel_end: PhysicalAddress,
) -> Result<BootMapping, MemoryInitError> {
    log_memory_map(map);
    add_boot_regions(ram, mmu, map, kernel_end).map_err(MemoryInitError::MemoryMap)?;

    // SAFETY: forwarded to the caller.
    let mapping =
        unsafe { build_kernel_map(ram, mmu, window, &VirtualLayout::DEFAULT, kernel_end)? };
    window.init();
    log_regions(ram);
    Ok(mapping)
}

/// Build a throwaway process space with a stack and a heap page, tear it down
/// and check that every frame came back.
///
/// # Errors
/// Whatever the process builder fails with, or [`SelfCheckError::Leak`].
pub fn self_check<M: Mmu>(
    ram: &mut RegionTable<'_>,
    mmu: &M,
    window: &TempWindow,
) -> Result<(), SelfCheckError> {
    let before = ram.free_pages();
    let mut frames = RegionFrames::new(ram, mmu);

    let mut process = ProcessSpace::create(mmu, window, &mut frames)?;
    process.map_stack(mmu, window, &mut frames, CHECK_STACK_PAGES)?;
    process.grow_heap(mmu, window, &mut frames, 1)?;
    let used = before - frames.table().free_pages();
    process.destroy(mmu, window, &mut frames)?;

    let after = frames.table().free_pages();
    if after != before {
        return Err(SelfCheckError::Leak {
            leaked: before.saturating_sub(after),
        });
    }
    info!("process space self check passed ({used} pages used and returned)");
    Ok(())
}
