//! # Page table
//!
//! - [`PageTable`]: a 4 KiB-aligned array of 1024 [`TableEntry`] values.
//! - [`TableFrame`]: a physical frame known to hold a page table.
//!
//! Indices are checked: out-of-range setters fail with
//! [`VmemError::IndexOutOfRange`], out-of-range getters read as absent.

use crate::{FrameAlloc, Mmu, TableEntry, TableFlags, TempMapping, TempWindow, VmemError};
use kernel_info::memory::{ENTRIES_PER_TABLE, is_boot_reserved};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use log::debug;

/// The page table: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [TableEntry; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    /// Create a fully zeroed page table (all entries absent).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [TableEntry::new(); ENTRIES_PER_TABLE],
        }
    }

    /// Entry `i`, or `None` if out of range.
    #[inline]
    #[must_use]
    pub fn entry(&self, i: usize) -> Option<TableEntry> {
        self.entries.get(i).copied()
    }

    /// Address half of entry `i`; zero when out of range.
    #[inline]
    #[must_use]
    pub fn addr(&self, i: usize) -> PhysicalAddress {
        self.entry(i).map_or(PhysicalAddress::zero(), TableEntry::addr)
    }

    /// Flag half of entry `i`; empty when out of range.
    #[inline]
    #[must_use]
    pub fn flags(&self, i: usize) -> TableFlags {
        self.entry(i).map_or(TableFlags::empty(), TableEntry::flags)
    }

    /// Replace the address half of entry `i`.
    ///
    /// # Errors
    /// [`VmemError::IndexOutOfRange`].
    pub fn set_addr(&mut self, i: usize, pa: PhysicalAddress) -> Result<(), VmemError> {
        self.slot(i)?.set_addr(pa);
        Ok(())
    }

    /// Replace the flag half of entry `i`.
    ///
    /// # Errors
    /// [`VmemError::IndexOutOfRange`].
    pub fn set_flags(&mut self, i: usize, flags: TableFlags) -> Result<(), VmemError> {
        self.slot(i)?.set_flags(flags);
        Ok(())
    }

    /// Replace both halves of entry `i`.
    ///
    /// # Errors
    /// [`VmemError::IndexOutOfRange`].
    pub fn set(
        &mut self,
        i: usize,
        pa: PhysicalAddress,
        flags: TableFlags,
    ) -> Result<(), VmemError> {
        let e = self.slot(i)?;
        e.set_addr(pa);
        e.set_flags(flags);
        Ok(())
    }

    /// Make entry `i` absent.
    ///
    /// # Errors
    /// [`VmemError::IndexOutOfRange`].
    pub fn clear_entry(&mut self, i: usize) -> Result<(), VmemError> {
        *self.slot(i)? = TableEntry::new();
        Ok(())
    }

    /// Make every entry absent.
    pub fn clear(&mut self) {
        self.entries.fill(TableEntry::new());
    }

    /// Present entries with their index.
    pub fn present(&self) -> impl Iterator<Item = (usize, TableEntry)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.is_present())
    }

    fn slot(&mut self, i: usize) -> Result<&mut TableEntry, VmemError> {
        self.entries.get_mut(i).ok_or(VmemError::IndexOutOfRange(i))
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// A physical frame holding a page table.
///
/// Not `Copy`: a handle is the right to edit the table, and
/// [`open`](Self::open) borrows it mutably.
#[derive(Debug, PartialEq, Eq)]
pub struct TableFrame(PhysicalPage<Size4K>);

impl TableFrame {
    /// Treat the already allocated `page` as a page table and zero it.
    ///
    /// # Errors
    /// Whatever mapping the frame fails with.
    pub fn create<M: Mmu>(
        mmu: &M,
        window: &TempWindow,
        page: PhysicalPage<Size4K>,
    ) -> Result<Self, VmemError> {
        let mut frame = Self(page);
        frame.open(mmu, window)?.clear();
        Ok(frame)
    }

    /// Wrap a frame that already holds a page table.
    ///
    /// # Safety
    /// `page` must hold a page table and no other handle to it may exist.
    #[inline]
    #[must_use]
    pub const unsafe fn from_page(page: PhysicalPage<Size4K>) -> Self {
        Self(page)
    }

    #[inline]
    #[must_use]
    pub const fn page(&self) -> PhysicalPage<Size4K> {
        self.0
    }

    /// Give up the handle without freeing the frame.
    #[inline]
    #[must_use]
    pub const fn into_page(self) -> PhysicalPage<Size4K> {
        self.0
    }

    /// View the table.
    ///
    /// # Errors
    /// As [`TempWindow::map`].
    pub fn open<'a, M: Mmu>(
        &'a mut self,
        mmu: &'a M,
        window: &'a TempWindow,
    ) -> Result<TempMapping<'a, M, PageTable>, VmemError> {
        // SAFETY: the handle is unique and guarantees a page table.
        unsafe { window.borrow(mmu, self.0) }
    }

    /// Free every mapped page, then the table itself.
    ///
    /// # Errors
    /// - [`VmemError::BootReserved`] for fixed boot pages (nothing is freed),
    /// - whatever mapping or freeing fails with.
    pub fn free<M: Mmu, F: FrameAlloc>(
        mut self,
        mmu: &M,
        window: &TempWindow,
        frames: &mut F,
    ) -> Result<(), VmemError> {
        let pa = self.0.base();
        if is_boot_reserved(pa.as_u32()) {
            return Err(VmemError::BootReserved(pa));
        }

        let mut freed = 0usize;
        {
            let table = self.open(mmu, window)?;
            for (_, e) in table.present() {
                frames.free_4k(e.page())?;
                freed += 1;
            }
        }
        frames.free_4k(self.0)?;
        debug!("freed page table {pa} and {freed} mapped pages");
        Ok(())
    }
}
