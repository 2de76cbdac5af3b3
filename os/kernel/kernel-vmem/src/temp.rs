//! # Temporary mapping window
//!
//! A fixed run of [`VADDR_TMP_PAGE_COUNT`] virtual pages inside table 0 that
//! can be pointed at any physical frame on demand. Page tables of inactive
//! directories are edited through it.
//!
//! Slots are reference counted per physical address: mapping an address that
//! already occupies a slot returns the same virtual address and bumps the
//! count. When the count drops to zero the slot's entry is cleared and the TLB
//! entry flushed, so a stale pointer faults instead of reading a frame that
//! has been rebound in the meantime.
//!
//! The window's table entries live in table 0, which every page directory
//! shares. A mapping taken under one directory is therefore still visible
//! after switching to another one, but callers must not rely on that: the
//! active directory is the only one whose table 0 is guaranteed to be the
//! kernel's.

use crate::recursive::active_table;
use crate::{Mmu, PageTable, TableFlags, VmemError};
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;
use kernel_info::memory::{VADDR_TMP_PAGE_COUNT, VirtualLayout};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_sync::SpinLock;
use log::{debug, warn};

/// Flags of a window entry.
pub const TEMP_FLAGS: TableFlags = TableFlags::USER;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
struct TempSlot {
    /// Bound frame; kept after the count drops to zero to detect over-release.
    addr: Option<PhysicalPage<Size4K>>,
    count: u32,
}

impl TempSlot {
    const EMPTY: Self = Self {
        addr: None,
        count: 0,
    };
}

/// The temporary mapping window.
pub struct TempWindow {
    base: VirtualAddress,
    slots: SpinLock<[TempSlot; VADDR_TMP_PAGE_COUNT]>,
}

impl TempWindow {
    /// A window at `layout.tmp_page_base` with every slot free.
    #[must_use]
    pub const fn new(layout: &VirtualLayout) -> Self {
        Self {
            base: layout.tmp_page_base,
            slots: SpinLock::new([TempSlot::EMPTY; VADDR_TMP_PAGE_COUNT]),
        }
    }

    /// Forget every binding. Window entries already in table 0 are left as
    /// they are; call this once, right after paging has been enabled.
    pub fn init(&self) {
        self.slots.with_lock_irq(|slots| *slots = [TempSlot::EMPTY; VADDR_TMP_PAGE_COUNT]);
    }

    /// Virtual address of slot `slot`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn slot_address(&self, slot: usize) -> VirtualAddress {
        VirtualAddress::new(self.base.as_u32() + (slot as u32) * 4096)
    }

    /// Number of slots with a zero reference count.
    #[must_use]
    pub fn available(&self) -> usize {
        self.slots
            .with_lock_irq(|slots| slots.iter().filter(|s| s.count == 0).count())
    }

    /// Map `pa` into the window and return its virtual address.
    ///
    /// # Errors
    /// - [`VmemError::NullAddress`] / [`VmemError::Unaligned`] for bad input,
    /// - [`VmemError::PagingDisabled`] before paging is on,
    /// - [`VmemError::WindowFull`] if every slot is in use.
    pub fn map<M: Mmu>(&self, mmu: &M, pa: PhysicalAddress) -> Result<VirtualAddress, VmemError> {
        let page = checked_page(pa)?;
        if !mmu.paging_enabled() {
            return Err(VmemError::PagingDisabled);
        }

        let mut slots = self.slots.lock_irq();

        if let Some(i) = slots.iter().position(|s| s.addr == Some(page)) {
            let slot = &mut slots[i];
            slot.count += 1;
            if slot.count == 1 {
                self.install(mmu, i, Some(page));
            }
            return Ok(self.slot_address(i));
        }

        let Some(i) = slots.iter().position(|s| s.count == 0) else {
            debug!("temporary window exhausted while mapping {pa}");
            return Err(VmemError::WindowFull);
        };
        slots[i] = TempSlot {
            addr: Some(page),
            count: 1,
        };
        self.install(mmu, i, Some(page));
        debug!("temp slot {i} -> {pa}");
        Ok(self.slot_address(i))
    }

    /// Drop one reference to the mapping of `pa`.
    ///
    /// # Errors
    /// - [`VmemError::NullAddress`] / [`VmemError::Unaligned`] for bad input,
    /// - [`VmemError::NotMapped`] if `pa` was never mapped,
    /// - [`VmemError::OverRelease`] if its count is already zero.
    pub fn unmap<M: Mmu>(&self, mmu: &M, pa: PhysicalAddress) -> Result<(), VmemError> {
        let page = checked_page(pa)?;
        let mut slots = self.slots.lock_irq();

        let Some(i) = slots.iter().position(|s| s.addr == Some(page)) else {
            return Err(VmemError::NotMapped(pa));
        };
        let slot = &mut slots[i];
        if slot.count == 0 {
            warn!("temporary mapping of {pa} released more often than acquired");
            return Err(VmemError::OverRelease(pa));
        }

        slot.count -= 1;
        if slot.count == 0 {
            self.install(mmu, i, None);
        }
        Ok(())
    }

    /// Map `page` and view it as a `T` for the lifetime of the guard.
    ///
    /// While paging is disabled the frame is reached directly and no slot is
    /// used; afterwards a slot is taken and released on drop.
    ///
    /// # Safety
    /// `page` must hold a valid `T`, and no other reference to it may be live
    /// while the guard exists. In particular two guards over the same frame
    /// share a slot and must not coexist.
    ///
    /// # Errors
    /// As [`map`](Self::map).
    pub unsafe fn borrow<'a, M: Mmu, T>(
        &'a self,
        mmu: &'a M,
        page: PhysicalPage<Size4K>,
    ) -> Result<TempMapping<'a, M, T>, VmemError> {
        const { assert!(size_of::<T>() <= 4096) };

        // SAFETY: validity and exclusivity are on the caller.
        if let Some(direct) = unsafe { mmu.deref_physical::<T>(page.base()) } {
            return Ok(TempMapping {
                window: self,
                mmu,
                ptr: NonNull::from(direct),
                slot: None,
                _phantom: PhantomData,
            });
        }

        let va = self.map(mmu, page.base())?;
        // SAFETY: just mapped writable in the active directory.
        let mapped = unsafe { mmu.deref_virtual::<T>(va) };
        Ok(TempMapping {
            window: self,
            mmu,
            ptr: NonNull::from(mapped),
            slot: Some(page),
            _phantom: PhantomData,
        })
    }

    /// Write (or clear) the table 0 entry of slot `i` and flush it.
    fn install<M: Mmu>(&self, mmu: &M, i: usize, page: Option<PhysicalPage<Size4K>>) {
        let va = self.slot_address(i);
        // SAFETY: table 0 is reachable through the recursive slot of the
        // active directory, and only the window's own entries are touched
        // (under the slot lock).
        let table0 = unsafe { mmu.deref_virtual::<PageTable>(active_table(0)) };
        let index = usize::from(va.table_index());
        let result = match page {
            Some(page) => table0.set(index, page.base(), TEMP_FLAGS),
            None => table0.clear_entry(index),
        };
        debug_assert!(result.is_ok(), "window slot outside table 0");
        mmu.flush_page(va);
    }
}

fn checked_page(pa: PhysicalAddress) -> Result<PhysicalPage<Size4K>, VmemError> {
    if pa.is_null() {
        return Err(VmemError::NullAddress);
    }
    PhysicalPage::try_from(pa).map_err(VmemError::Unaligned)
}

/// A frame viewed as `T`, released when dropped.
pub struct TempMapping<'a, M: Mmu, T> {
    window: &'a TempWindow,
    mmu: &'a M,
    ptr: NonNull<T>,
    /// `None` when the frame was reached without the window.
    slot: Option<PhysicalPage<Size4K>>,
    _phantom: PhantomData<&'a mut T>,
}

impl<M: Mmu, T> TempMapping<'_, M, T> {
    /// Whether this view occupies a window slot.
    #[inline]
    #[must_use]
    pub const fn is_windowed(&self) -> bool {
        self.slot.is_some()
    }
}

impl<M: Mmu, T> Deref for TempMapping<'_, M, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: valid for the guard's lifetime per `TempWindow::borrow`.
        unsafe { self.ptr.as_ref() }
    }
}

impl<M: Mmu, T> DerefMut for TempMapping<'_, M, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: exclusive per `TempWindow::borrow`.
        unsafe { self.ptr.as_mut() }
    }
}

impl<M: Mmu, T> Drop for TempMapping<'_, M, T> {
    fn drop(&mut self) {
        if let Some(page) = self.slot
            && let Err(e) = self.window.unmap(self.mmu, page.base())
        {
            warn!("releasing temporary mapping failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimulatedMmu;

    fn booted() -> (SimulatedMmu, TempWindow) {
        let mmu = SimulatedMmu::new();
        mmu.bootstrap(
            PhysicalPage::from_number(1),
            PhysicalPage::from_number(0x10),
            PhysicalPage::from_number(0x11),
        );
        let window = TempWindow::new(&VirtualLayout::DEFAULT);
        window.init();
        (mmu, window)
    }

    fn frame(n: u32) -> PhysicalAddress {
        PhysicalAddress::new(0x0020_0000 + n * 4096)
    }

    #[test]
    fn twenty_five_distinct_frames_then_full() {
        let (mmu, window) = booted();
        assert_eq!(window.available(), VADDR_TMP_PAGE_COUNT);

        let mut seen = Vec::new();
        for n in 0..25 {
            let va = window.map(&mmu, frame(n)).unwrap();
            assert!(!seen.contains(&va));
            seen.push(va);
        }
        assert_eq!(window.available(), 0);
        assert_eq!(window.map(&mmu, frame(25)), Err(VmemError::WindowFull));

        window.unmap(&mmu, frame(7)).unwrap();
        assert_eq!(window.map(&mmu, frame(25)), Ok(seen[7]));
    }

    #[test]
    fn slots_are_handed_out_in_order() {
        let (mmu, window) = booted();
        assert_eq!(window.map(&mmu, frame(0)).unwrap().as_u32(), 0x9F000);
        assert_eq!(window.map(&mmu, frame(1)).unwrap().as_u32(), 0xA0000);
        window.unmap(&mmu, frame(0)).unwrap();
        assert_eq!(window.map(&mmu, frame(2)).unwrap().as_u32(), 0x9F000);
    }

    #[test]
    fn sharing_is_idempotent() {
        let (mmu, window) = booted();
        let a = window.map(&mmu, frame(3)).unwrap();
        let b = window.map(&mmu, frame(3)).unwrap();
        assert_eq!(a, b);
        assert_eq!(window.available(), VADDR_TMP_PAGE_COUNT - 1);

        window.unmap(&mmu, frame(3)).unwrap();
        assert_eq!(mmu.walk(a), Some(frame(3)));
        window.unmap(&mmu, frame(3)).unwrap();
        assert_eq!(window.available(), VADDR_TMP_PAGE_COUNT);
    }

    #[test]
    fn rejects_null_and_unaligned() {
        let (mmu, window) = booted();
        assert_eq!(
            window.map(&mmu, PhysicalAddress::zero()),
            Err(VmemError::NullAddress)
        );
        assert_eq!(
            window.map(&mmu, PhysicalAddress::new(0x0020_0010)),
            Err(VmemError::Unaligned(PhysicalAddress::new(0x0020_0010)))
        );
        assert_eq!(
            window.unmap(&mmu, frame(9)),
            Err(VmemError::NotMapped(frame(9)))
        );
        assert_eq!(window.available(), VADDR_TMP_PAGE_COUNT);
    }

    #[test]
    fn over_release_is_an_error() {
        let (mmu, window) = booted();
        window.map(&mmu, frame(4)).unwrap();
        window.unmap(&mmu, frame(4)).unwrap();
        assert_eq!(
            window.unmap(&mmu, frame(4)),
            Err(VmemError::OverRelease(frame(4)))
        );
        assert_eq!(window.available(), VADDR_TMP_PAGE_COUNT);
    }

    #[test]
    fn release_clears_and_flushes_the_entry() {
        let (mmu, window) = booted();
        let va = window.map(&mmu, frame(5)).unwrap();
        assert_eq!(mmu.walk(va), Some(frame(5)));

        window.unmap(&mmu, frame(5)).unwrap();
        assert_eq!(mmu.walk(va), None);
        assert_eq!(mmu.flushed(), vec![va, va]);
    }

    #[test]
    fn mapped_frame_is_the_physical_frame() {
        let (mmu, window) = booted();
        let va = window.map(&mmu, frame(6)).unwrap();
        // SAFETY: freshly mapped, nothing else references it.
        let word = unsafe { mmu.deref_virtual::<u32>(va + 8) };
        *word = 0xDEAD_BEEF;
        assert_eq!(mmu.read_u32(frame(6) + 8), 0xDEAD_BEEF);
    }

    #[test]
    fn window_requires_paging() {
        let mmu = SimulatedMmu::new();
        let window = TempWindow::new(&VirtualLayout::DEFAULT);
        assert_eq!(window.map(&mmu, frame(0)), Err(VmemError::PagingDisabled));
    }

    #[test]
    fn borrow_releases_on_drop() {
        let (mmu, window) = booted();
        {
            // SAFETY: a fresh frame viewed as a plain array.
            let mut view = unsafe { window.borrow::<_, [u32; 4]>(&mmu, frame(8).page()) }.unwrap();
            assert!(view.is_windowed());
            view[1] = 42;
            assert_eq!(window.available(), VADDR_TMP_PAGE_COUNT - 1);
        }
        assert_eq!(window.available(), VADDR_TMP_PAGE_COUNT);
        assert_eq!(mmu.read_u32(frame(8) + 4), 42);
    }

    #[test]
    fn borrow_without_paging_is_direct() {
        let mmu = SimulatedMmu::new();
        let window = TempWindow::new(&VirtualLayout::DEFAULT);
        {
            // SAFETY: a fresh frame viewed as a plain word.
            let mut view = unsafe { window.borrow::<_, u32>(&mmu, frame(1).page()) }.unwrap();
            assert!(!view.is_windowed());
            *view = 7;
        }
        assert_eq!(mmu.read_u32(frame(1)), 7);
        assert_eq!(window.available(), VADDR_TMP_PAGE_COUNT);
    }
}
