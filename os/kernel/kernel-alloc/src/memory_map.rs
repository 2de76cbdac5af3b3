//! Feeding the firmware memory map into the region table.

use crate::{RamError, RegionTable};
use kernel_info::boot::BootMemoryRegion;
use kernel_info::memory::{PADDR_STACK_TOP, PAGE_SIZE};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::Mmu;
use log::{debug, info, warn};

const FOUR_GIB: u64 = 1 << 32;

/// Register every allocatable extent of `map` that lies above `kernel_end`.
///
/// Records of kind 1 (usable) and 3 (ACPI reclaimable) are used; everything
/// else is skipped. Each extent is clipped to `kernel_end .. 4 GiB`, never
/// reaching below the boot structures, rounded in to whole pages and handed to
/// [`RegionTable::add_memory`]. Extents that are too small or overlap an
/// earlier one are skipped. Returns the number of extents accepted.
///
/// # Errors
/// - [`RamError::NoUsableMemory`] if no extent was accepted,
/// - any other [`RegionTable::add_memory`] failure, such as
///   [`RamError::TableFull`].
pub fn add_boot_regions<M: Mmu>(
    table: &mut RegionTable<'_>,
    mmu: &M,
    map: &[BootMemoryRegion],
    kernel_end: PhysicalAddress,
) -> Result<usize, RamError> {
    let floor = align_up(u64::from(kernel_end.as_u32().max(PADDR_STACK_TOP)));
    let mut accepted = 0;

    for record in map {
        let kind = record.kind();
        if !kind.is_allocatable() {
            debug!(
                "skipping {:?} memory at {:#x}+{:#x}",
                kind, record.base_addr, record.length
            );
            continue;
        }

        if record.base_addr >= FOUR_GIB {
            debug!("skipping {:#x}+{:#x} above 4 GiB", record.base_addr, record.length);
            continue;
        }
        let start = align_up(record.base_addr.max(floor));
        let end = align_down(record.end().min(FOUR_GIB));
        if start >= end {
            debug!("skipping {:#x}+{:#x} below the kernel end", record.base_addr, record.length);
            continue;
        }

        #[allow(clippy::cast_possible_truncation)]
        let (base, length) = (start as u32, (end - start).min(u64::from(u32::MAX)) as u32);
        match table.add_memory(mmu, PhysicalAddress::new(base), length) {
            Ok(_) => accepted += 1,
            Err(RamError::TooSmall(len)) => debug!("skipping {len:#x} bytes at {base:#x}"),
            Err(RamError::Overlap(at)) => warn!("skipping overlapping extent at {at}"),
            Err(e) => return Err(e),
        }
    }

    if accepted == 0 {
        return Err(RamError::NoUsableMemory);
    }
    info!(
        "{accepted} memory extent(s): {} regions, {} of {} pages free",
        table.count(),
        table.free_pages(),
        table.max_pages()
    );
    Ok(accepted)
}

fn align_up(v: u64) -> u64 {
    v.next_multiple_of(u64::from(PAGE_SIZE))
}

fn align_down(v: u64) -> u64 {
    v - v % u64::from(PAGE_SIZE)
}
