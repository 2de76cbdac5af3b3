//! [`FrameAlloc`] on top of the region table.

use crate::{RamError, RegionTable};
use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_vmem::{FrameAlloc, Mmu, VmemError};
use log::warn;

/// Hands out region table pages to the paging code.
///
/// Uses [`RegionTable::page_palloc`] while paging is disabled and
/// [`RegionTable::page_alloc`] afterwards, so the same adapter serves the boot
/// mapping and the process builder.
pub struct RegionFrames<'r, 't, M: Mmu> {
    table: &'r mut RegionTable<'t>,
    mmu: &'r M,
}

impl<'r, 't, M: Mmu> RegionFrames<'r, 't, M> {
    #[must_use]
    pub fn new(table: &'r mut RegionTable<'t>, mmu: &'r M) -> Self {
        Self { table, mmu }
    }

    /// The underlying table, e.g. for statistics.
    #[must_use]
    pub fn table(&self) -> &RegionTable<'t> {
        self.table
    }
}

impl<M: Mmu> FrameAlloc for RegionFrames<'_, '_, M> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        let result = if self.mmu.paging_enabled() {
            self.table.page_alloc(self.mmu)
        } else {
            self.table.page_palloc(self.mmu)
        };
        match result {
            Ok(page) => Some(page),
            Err(RamError::OutOfMemory) => None,
            Err(e) => {
                warn!("frame allocation failed: {e}");
                None
            }
        }
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) -> Result<(), VmemError> {
        self.table
            .page_free(self.mmu, page.base())
            .map_err(|_| VmemError::FreeRejected(page.base()))
    }
}
