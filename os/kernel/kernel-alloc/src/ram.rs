//! # Region table allocator
//!
//! Physical memory is handed out page by page from up to
//! [`REGION_TABLE_CAPACITY`] regions. Each region is a contiguous run of at most
//! [`REGION_MAX_PAGES`] pages whose first page is its free/used bitmap.
//!
//! ## Lifecycle
//!
//! 1. [`RegionTable::new`] / [`RegionTable::from_raw`] with paging disabled.
//! 2. [`RegionTable::add_memory`] for every usable extent, still with paging
//!    disabled; [`page_palloc`](RegionTable::page_palloc) may run in between.
//! 3. The boot mapping identity maps each region's bitmap into the bitmap
//!    window at `bitmaps + index * 4 KiB`.
//! 4. With paging enabled, [`page_alloc`](RegionTable::page_alloc) and
//!    [`page_free`](RegionTable::page_free) reach the bitmaps through that
//!    window.
//!
//! Regions are kept sorted by base address and are never removed, so a region
//! index (and therefore its bitmap window slot) is stable once paging is on.
//!
//! ## Allocation order
//!
//! First fit, both across regions (ascending base) and within a bitmap
//! (ascending page, starting at page 1). Tests rely on it.

use crate::region::{
    Bitmap, REGION_MAX_PAGES, REGION_MIN_PAGES, REGION_TABLE_CAPACITY, RegionEntry, RegionInfo,
    RegionTableStorage,
};
use crate::RamError;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::Mmu;
use log::{debug, info, warn};

/// The physical page allocator.
pub struct RegionTable<'t> {
    entries: &'t mut [RegionEntry; REGION_TABLE_CAPACITY],
    bitmaps: VirtualAddress,
}

impl<'t> RegionTable<'t> {
    /// Zero `storage` and use it as an empty region table whose bitmaps will be
    /// visible at `bitmaps` once paging is enabled.
    ///
    /// # Errors
    /// [`RamError::NullBitmapWindow`] if `bitmaps` is null.
    pub fn new(
        storage: &'t mut RegionTableStorage,
        bitmaps: VirtualAddress,
    ) -> Result<Self, RamError> {
        if bitmaps.is_null() {
            return Err(RamError::NullBitmapWindow);
        }
        storage.entries.fill(RegionEntry::new());
        Ok(Self {
            entries: &mut storage.entries,
            bitmaps,
        })
    }

    /// [`new`](Self::new) over raw storage, such as the fixed boot page.
    ///
    /// # Errors
    /// [`RamError::NullTable`] / [`RamError::NullBitmapWindow`].
    ///
    /// # Safety
    /// A non-null `storage` must be valid, writable and unaliased for `'t`,
    /// and stay reachable at the same address after paging is enabled.
    pub unsafe fn from_raw(
        storage: *mut RegionTableStorage,
        bitmaps: VirtualAddress,
    ) -> Result<Self, RamError> {
        // SAFETY: validity is on the caller; null is rejected here.
        let Some(storage) = (unsafe { storage.as_mut() }) else {
            return Err(RamError::NullTable);
        };
        Self::new(storage, bitmaps)
    }

    /// Base of the bitmap window.
    #[inline]
    #[must_use]
    pub const fn bitmap_window(&self) -> VirtualAddress {
        self.bitmaps
    }

    /// Number of registered regions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.iter().take_while(|e| e.present()).count()
    }

    /// Free pages across all regions.
    #[must_use]
    pub fn free_pages(&self) -> u32 {
        self.live().iter().map(|e| u32::from(e.free_count())).sum()
    }

    /// Pages across all regions, bitmap pages included.
    #[must_use]
    pub fn max_pages(&self) -> u32 {
        self.live().iter().map(|e| u32::from(e.page_count())).sum()
    }

    /// Registered regions in table (ascending address) order.
    pub fn regions(&self) -> impl Iterator<Item = RegionInfo> + '_ {
        self.live().iter().copied().map(RegionInfo::from)
    }

    /// Register the extent `base .. base + length`.
    ///
    /// The extent is split into regions of at most [`REGION_MAX_PAGES`] pages;
    /// a trailing split too small to hold a bitmap and one page is dropped,
    /// as are bytes past the last whole page or past 4 GiB. Every new region
    /// gets a fresh bitmap in its first page. Returns the number of regions
    /// added.
    ///
    /// # Errors
    /// - [`RamError::PagingEnabled`] once paging is on,
    /// - [`RamError::ZeroBase`] / [`RamError::Unaligned`] / [`RamError::TooSmall`],
    /// - [`RamError::Overlap`] if the extent intersects a registered region,
    /// - [`RamError::TableFull`] if the splits do not fit.
    ///
    /// The table is unchanged on error.
    pub fn add_memory<M: Mmu>(
        &mut self,
        mmu: &M,
        base: PhysicalAddress,
        length: u32,
    ) -> Result<usize, RamError> {
        if mmu.paging_enabled() {
            return Err(RamError::PagingEnabled);
        }
        if base.is_null() {
            return Err(RamError::ZeroBase);
        }
        let Ok(first) = PhysicalPage::<Size4K>::try_from(base) else {
            return Err(RamError::Unaligned(base));
        };

        let room = (u64::from(u32::MAX) + 1 - u64::from(base.as_u32())) / u64::from(PAGE_SIZE);
        #[allow(clippy::cast_possible_truncation)]
        let pages = (length / PAGE_SIZE).min(room as u32);
        if pages < REGION_MIN_PAGES {
            return Err(RamError::TooSmall(length));
        }

        let splits = split_count(pages);
        let start = u64::from(base.as_u32());
        let end = start + u64::from(pages) * u64::from(PAGE_SIZE);
        if let Some(r) = self
            .live()
            .iter()
            .find(|r| start < r.end() && u64::from(r.base().base().as_u32()) < end)
        {
            warn!("extent {base}+{length:#x} overlaps region at {}", r.base().base());
            return Err(RamError::Overlap(base));
        }

        let count = self.count();
        if count + splits > REGION_TABLE_CAPACITY {
            return Err(RamError::TableFull);
        }

        let at = self
            .live()
            .iter()
            .position(|r| r.base() > first)
            .unwrap_or(count);
        self.entries.copy_within(at..count, at + splits);

        let mut next = first;
        let mut remaining = pages;
        for slot in at..at + splits {
            let size = remaining.min(REGION_MAX_PAGES);
            let entry = RegionEntry::fresh(next, size);
            self.entries[slot] = entry;
            // SAFETY: paging is off; the region's first page is RAM the caller
            // handed over.
            let bitmap = unsafe { Self::physical_bitmap(mmu, &entry) }?;
            bitmap.reset(size);
            debug!("region {slot}: {} pages at {}", size, next.base());

            remaining -= size;
            if remaining == 0 {
                break;
            }
            next = PhysicalPage::from_number(next.number() + size);
        }

        info!(
            "added {splits} region(s) for {base}+{:#x}, {} free pages total",
            u64::from(pages) * u64::from(PAGE_SIZE),
            self.free_pages()
        );
        Ok(splits)
    }

    /// Allocate one page through the bitmap window.
    ///
    /// # Errors
    /// - [`RamError::PagingDisabled`] before paging is on,
    /// - [`RamError::OutOfMemory`] if every page is in use.
    pub fn page_alloc<M: Mmu>(&mut self, mmu: &M) -> Result<PhysicalPage<Size4K>, RamError> {
        if !mmu.paging_enabled() {
            return Err(RamError::PagingDisabled);
        }
        self.alloc_first_fit(mmu)
    }

    /// Allocate one page, reaching the bitmaps by physical address.
    ///
    /// # Errors
    /// - [`RamError::PagingEnabled`] once paging is on,
    /// - [`RamError::OutOfMemory`] if every page is in use.
    pub fn page_palloc<M: Mmu>(&mut self, mmu: &M) -> Result<PhysicalPage<Size4K>, RamError> {
        if mmu.paging_enabled() {
            return Err(RamError::PagingEnabled);
        }
        self.alloc_first_fit(mmu)
    }

    /// Return the page at `pa`. Works with paging on or off.
    ///
    /// # Errors
    /// - [`RamError::Unaligned`],
    /// - [`RamError::NotOwned`] if no region holds `pa` or it is a bitmap page,
    /// - [`RamError::DoubleFree`] if the page is already free.
    ///
    /// Nothing changes on error.
    pub fn page_free<M: Mmu>(&mut self, mmu: &M, pa: PhysicalAddress) -> Result<(), RamError> {
        if !pa.is_aligned::<Size4K>() {
            return Err(RamError::Unaligned(pa));
        }
        let Some(index) = self.live().iter().position(|r| r.contains(pa)) else {
            warn!("freeing {pa}, which no region owns");
            return Err(RamError::NotOwned(pa));
        };

        let entry = self.entries[index];
        let bit = (pa.as_u32() - entry.base().base().as_u32()) / PAGE_SIZE;
        if bit == 0 {
            warn!("freeing {pa}, the bitmap page of region {index}");
            return Err(RamError::NotOwned(pa));
        }

        // SAFETY: region `index` exists and has been set up for both views.
        let bitmap = unsafe { self.bitmap(mmu, index) }?;
        if bitmap.is_free(bit) {
            warn!("double free of {pa}");
            return Err(RamError::DoubleFree(pa));
        }
        bitmap.set(bit, true);
        self.entries[index] = entry.with_free_count(entry.free_count() + 1);
        Ok(())
    }

    fn live(&self) -> &[RegionEntry] {
        &self.entries[..self.count()]
    }

    fn alloc_first_fit<M: Mmu>(&mut self, mmu: &M) -> Result<PhysicalPage<Size4K>, RamError> {
        let Some(index) = self.live().iter().position(|r| r.free_count() > 0) else {
            debug!("physical memory exhausted");
            return Err(RamError::OutOfMemory);
        };

        let entry = self.entries[index];
        // SAFETY: region `index` exists and has been set up for both views.
        let bitmap = unsafe { self.bitmap(mmu, index) }?;
        let Some(bit) = bitmap.first_free(u32::from(entry.page_count())) else {
            panic!(
                "region {index} at {} counts {} free pages but its bitmap has none",
                entry.base().base(),
                entry.free_count()
            );
        };
        bitmap.set(bit, false);
        self.entries[index] = entry.with_free_count(entry.free_count() - 1);
        Ok(PhysicalPage::from_number(entry.base().number() + bit))
    }

    /// The bitmap of region `index` through whichever view the paging state
    /// allows.
    ///
    /// # Safety
    /// Region `index` must exist. With paging on, its bitmap must be mapped at
    /// its window slot.
    unsafe fn bitmap<'b, M: Mmu>(&self, mmu: &M, index: usize) -> Result<&'b mut Bitmap, RamError> {
        if mmu.paging_enabled() {
            #[allow(clippy::cast_possible_truncation)]
            let slot = self.bitmaps + index as u32 * PAGE_SIZE;
            // SAFETY: mapped per the contract; no other reference is live.
            Ok(unsafe { mmu.deref_virtual(slot) })
        } else {
            // SAFETY: as above, through the physical address.
            unsafe { Self::physical_bitmap(mmu, &self.entries[index]) }
        }
    }

    /// # Safety
    /// Paging must be off and `entry` a region whose first page is RAM.
    unsafe fn physical_bitmap<'b, M: Mmu>(
        mmu: &M,
        entry: &RegionEntry,
    ) -> Result<&'b mut Bitmap, RamError> {
        // SAFETY: forwarded.
        unsafe { mmu.deref_physical(entry.base().base()) }.ok_or(RamError::PagingEnabled)
    }
}

/// Number of regions `pages` is split into, a too small tail not counted.
fn split_count(pages: u32) -> usize {
    let full = pages / REGION_MAX_PAGES;
    let tail = pages % REGION_MAX_PAGES;
    (full + u32::from(tail >= REGION_MIN_PAGES)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits() {
        assert_eq!(split_count(2), 1);
        assert_eq!(split_count(REGION_MAX_PAGES), 1);
        assert_eq!(split_count(REGION_MAX_PAGES + 1), 1);
        assert_eq!(split_count(REGION_MAX_PAGES + 2), 2);
        assert_eq!(split_count(3 * REGION_MAX_PAGES + 7), 4);
    }
}
