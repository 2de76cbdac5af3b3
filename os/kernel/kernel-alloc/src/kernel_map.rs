//! # Boot mapping
//!
//! Builds the first page directory while paging is still off, then turns
//! paging on. Afterwards the low 4 MiB look like this:
//!
//! ```text
//! 0x0000_0000  null page, never mapped
//! 0x0000_1000  page directory        (identity)
//! 0x0000_2000  region table          (identity)
//! 0x0000_3000  boot stack            (identity, BOOT_STACK_PAGES pages)
//! 0x0009_F000  temporary window      (25 slots, installed on demand)
//! 0x000B_9000  bitmap window         (slot i -> bitmap page of region i)
//! 0x0010_0000  kernel image          (identity, up to the kernel end)
//! ```
//!
//! Directory slot 1023 carries the recursive self-map, so table 0 is also
//! visible at `0xFFC0_0000` and the last table at `0xFFFF_F000`.
//!
//! Table 0 and the last table come from the region table via
//! [`RegionTable::page_palloc`]. The directory itself lives at the fixed
//! [`PADDR_PAGE_DIR`].

use crate::{RamError, RegionTable};
use kernel_info::memory::{
    KERNEL_TABLE_END, LayoutError, PADDR_PAGE_DIR, PADDR_RAM_TABLE, PADDR_STACK, PADDR_STACK_TOP,
    PAGE_SIZE, PHYS_LOAD, VirtualLayout,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::recursive::install_self_map;
use kernel_vmem::{DirectoryFrame, Mmu, PageTable, TableFlags, TableFrame, TempWindow, VmemError};
use log::{info, trace, warn};

/// Where the boot mapping put things.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootMapping {
    pub directory: PhysicalPage<Size4K>,
    pub table0: PhysicalPage<Size4K>,
    pub last_table: PhysicalPage<Size4K>,
    /// Identity mapped pages, bitmap slots excluded.
    pub identity_pages: usize,
    /// Bitmap window slots, one per region.
    pub bitmap_slots: usize,
}

/// Failures of the boot mapping. All of them are fatal to the kernel.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootMapError {
    #[error(transparent)]
    Ram(#[from] RamError),
    #[error(transparent)]
    Vmem(#[from] VmemError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("kernel image ends at {0}, past the kernel table")]
    KernelTooLarge(PhysicalAddress),
    #[error("{0} would be mapped twice")]
    Collision(VirtualAddress),
    #[error("{0} lies outside the kernel table")]
    OutsideKernelTable(VirtualAddress),
    #[error("region table expects its bitmap window at {found}, the layout puts it at {expected}")]
    BitmapWindowMismatch {
        expected: VirtualAddress,
        found: VirtualAddress,
    },
    #[error("temporary window sits at {found}, the layout puts it at {expected}")]
    TempWindowMismatch {
        expected: VirtualAddress,
        found: VirtualAddress,
    },
}

/// Build the boot directory at [`PADDR_PAGE_DIR`] and enable paging on it.
///
/// `ram` must already hold every region; their bitmaps are mapped into the
/// bitmap window in table order.
///
/// # Errors
/// - [`RamError::PagingEnabled`] if paging is already on,
/// - [`BootMapError::Layout`] for an invalid `layout`,
/// - [`BootMapError::BitmapWindowMismatch`] / [`BootMapError::TempWindowMismatch`]
///   if `ram` or `window` was set up for a different layout,
/// - [`BootMapError::KernelTooLarge`] if the image leaves the first 4 MiB,
/// - [`BootMapError::Collision`] / [`BootMapError::OutsideKernelTable`] if the
///   bitmap window runs into the image or out of table 0,
/// - [`RamError::OutOfMemory`] if no page is left for the two tables.
///
/// Paging stays off on error and table 0 goes back to `ram`. The directory
/// page at [`PADDR_PAGE_DIR`] may already have been cleared.
///
/// # Safety
/// The caller's code, stack and every structure it uses afterwards must lie
/// in the identity mapped ranges listed in the module docs.
pub unsafe fn build_kernel_map<M: Mmu>(
    ram: &mut RegionTable<'_>,
    mmu: &M,
    window: &TempWindow,
    layout: &VirtualLayout,
    kernel_end: PhysicalAddress,
) -> Result<BootMapping, BootMapError> {
    layout.validate()?;
    if ram.bitmap_window() != layout.ram_bitmasks_base {
        return Err(BootMapError::BitmapWindowMismatch {
            expected: layout.ram_bitmasks_base,
            found: ram.bitmap_window(),
        });
    }
    if window.slot_address(0) != layout.tmp_page_base {
        return Err(BootMapError::TempWindowMismatch {
            expected: layout.tmp_page_base,
            found: window.slot_address(0),
        });
    }
    if mmu.paging_enabled() {
        return Err(RamError::PagingEnabled.into());
    }
    let image_end = kernel_end.as_u32().max(PHYS_LOAD).next_multiple_of(PAGE_SIZE);
    if image_end > KERNEL_TABLE_END {
        return Err(BootMapError::KernelTooLarge(kernel_end));
    }

    let directory = PhysicalPage::from_addr(PhysicalAddress::new(PADDR_PAGE_DIR));
    let mut dir = DirectoryFrame::create(mmu, window, directory)?;

    let table0 = ram.page_palloc(mmu)?;
    let linked = fill_table0(ram, mmu, window, layout, table0, image_end).and_then(|identity| {
        let last_table = ram.page_palloc(mmu)?;
        let mut last = TableFrame::create(mmu, window, last_table)?;
        let mut d = dir.open(mmu, window)?;
        let mut l = last.open(mmu, window)?;
        install_self_map(&mut d, &mut l, last_table, table0)?;
        Ok((identity, last_table))
    });
    let (identity_pages, last_table) = match linked {
        Ok(done) => done,
        Err(e) => {
            if let Err(free) = ram.page_free(mmu, table0.base()) {
                warn!("could not return table 0 at {}: {free}", table0.base());
            }
            return Err(e);
        }
    };
    let bitmap_slots = ram.count();

    info!(
        "boot directory at {}: {} identity pages, {bitmap_slots} bitmap slots, table 0 at {}, last table at {}",
        directory.base(),
        identity_pages,
        table0.base(),
        last_table.base()
    );
    // SAFETY: the directory identity maps everything listed above; the rest
    // is on the caller.
    unsafe { mmu.enable_paging(directory) };
    info!("paging enabled");

    Ok(BootMapping {
        directory,
        table0,
        last_table,
        identity_pages,
        bitmap_slots,
    })
}

/// Identity map the boot structures and the image into table 0 and point the
/// bitmap window at each region's bitmap. Returns the identity mapped pages.
fn fill_table0<M: Mmu>(
    ram: &RegionTable<'_>,
    mmu: &M,
    window: &TempWindow,
    layout: &VirtualLayout,
    table0: PhysicalPage<Size4K>,
    image_end: u32,
) -> Result<usize, BootMapError> {
    let mut frame = TableFrame::create(mmu, window, table0)?;
    let mut plan = Plan {
        layout,
        identity_pages: 0,
    };
    let mut t = frame.open(mmu, window)?;
    plan.identity(&mut t, PADDR_PAGE_DIR, PADDR_PAGE_DIR + PAGE_SIZE)?;
    plan.identity(&mut t, PADDR_RAM_TABLE, PADDR_RAM_TABLE + PAGE_SIZE)?;
    plan.identity(&mut t, PADDR_STACK, PADDR_STACK_TOP)?;
    plan.identity(&mut t, PHYS_LOAD, image_end)?;
    for (i, region) in ram.regions().enumerate() {
        plan.map(&mut t, layout.bitmask_slot(i), region.base.base())?;
    }
    debug_assert!(!t.entry(0).is_some_and(|e| e.is_present()));
    Ok(plan.identity_pages)
}

/// Collision-checked writes into table 0.
struct Plan<'l> {
    layout: &'l VirtualLayout,
    identity_pages: usize,
}

impl Plan<'_> {
    fn identity(&mut self, table: &mut PageTable, start: u32, end: u32) -> Result<(), BootMapError> {
        for pa in (start..end).step_by(PAGE_SIZE as usize) {
            self.map(table, VirtualAddress::new(pa), PhysicalAddress::new(pa))?;
            self.identity_pages += 1;
        }
        Ok(())
    }

    fn map(
        &self,
        table: &mut PageTable,
        va: VirtualAddress,
        pa: PhysicalAddress,
    ) -> Result<(), BootMapError> {
        if va.as_u32() >= KERNEL_TABLE_END {
            return Err(BootMapError::OutsideKernelTable(va));
        }
        let in_window = va.as_u32() >= self.layout.tmp_page_base.as_u32()
            && va.as_u32() < self.layout.tmp_end().as_u32();
        let index = usize::from(va.table_index());
        if va.is_null() || in_window || table.entry(index).is_some_and(|e| e.is_present()) {
            return Err(BootMapError::Collision(va));
        }
        table.set(index, pa, TableFlags::KERNEL)?;
        trace!("boot map {va} -> {pa}");
        Ok(())
    }
}
