//! # Page directory
//!
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 [`DirectoryEntry`] values,
//!   entry `i` covering virtual addresses `i << 22 .. (i + 1) << 22`.
//! - [`DirectoryFrame`]: a physical frame known to hold a page directory.

use crate::{
    DirectoryEntry, DirectoryFlags, FrameAlloc, Mmu, TableFrame, TempMapping, TempWindow,
    VmemError,
};
use kernel_info::memory::{ENTRIES_PER_TABLE, is_boot_reserved};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use log::{debug, warn};

/// The page directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [DirectoryEntry; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageDirectory>() == 4096);

impl PageDirectory {
    /// Create a fully zeroed page directory (all entries absent).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [DirectoryEntry::new(); ENTRIES_PER_TABLE],
        }
    }

    /// Entry `i`, or `None` if out of range.
    #[inline]
    #[must_use]
    pub fn entry(&self, i: usize) -> Option<DirectoryEntry> {
        self.entries.get(i).copied()
    }

    /// Address half of entry `i`; zero when out of range.
    #[inline]
    #[must_use]
    pub fn addr(&self, i: usize) -> PhysicalAddress {
        self.entry(i).map_or(PhysicalAddress::zero(), DirectoryEntry::addr)
    }

    /// Flag half of entry `i`; empty when out of range.
    #[inline]
    #[must_use]
    pub fn flags(&self, i: usize) -> DirectoryFlags {
        self.entry(i).map_or(DirectoryFlags::empty(), DirectoryEntry::flags)
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
    pub fn set_flags(&mut self, i: usize, flags: DirectoryFlags) -> Result<(), VmemError> {
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
        flags: DirectoryFlags,
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
        *self.slot(i)? = DirectoryEntry::new();
        Ok(())
    }

    /// Make every entry absent.
    pub fn clear(&mut self) {
        self.entries.fill(DirectoryEntry::new());
    }

    /// Present entries with their index.
    pub fn present(&self) -> impl Iterator<Item = (usize, DirectoryEntry)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.is_present())
    }

    fn slot(&mut self, i: usize) -> Result<&mut DirectoryEntry, VmemError> {
        self.entries
            .get_mut(i)
            .ok_or(VmemError::IndexOutOfRange(i))
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// A physical frame holding a page directory.
#[derive(Debug, PartialEq, Eq)]
pub struct DirectoryFrame(PhysicalPage<Size4K>);

impl DirectoryFrame {
    /// Treat the already allocated `page` as a page directory and zero it.
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

    /// Wrap a frame that already holds a page directory.
    ///
    /// # Safety
    /// `page` must hold a page directory and no other handle to it may exist.
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

    /// View the directory.
    ///
    /// # Errors
    /// As [`TempWindow::map`].
    pub fn open<'a, M: Mmu>(
        &'a mut self,
        mmu: &'a M,
        window: &'a TempWindow,
    ) -> Result<TempMapping<'a, M, PageDirectory>, VmemError> {
        // SAFETY: the handle is unique and guarantees a page directory.
        unsafe { window.borrow(mmu, self.0) }
    }

    /// Free every page table (and the pages they map), then the directory.
    ///
    /// Every present entry is treated as owned. Entries pointing at shared
    /// tables (the kernel's table 0, the recursive slot) must be cleared
    /// before calling this.
    ///
    /// # Errors
    /// - [`VmemError::ActiveDirectory`] if this is the directory in `CR3`,
    /// - [`VmemError::BootReserved`] for the boot directory,
    /// - whatever mapping or freeing fails with.
    ///
    /// Nothing is touched when one of the first two is returned.
    pub fn free<M: Mmu, F: FrameAlloc>(
        mut self,
        mmu: &M,
        window: &TempWindow,
        frames: &mut F,
    ) -> Result<(), VmemError> {
        let pa = self.0.base();
        if mmu.active_directory() == Some(self.0) {
            warn!("refusing to free the active page directory {pa}");
            return Err(VmemError::ActiveDirectory(pa));
        }
        if is_boot_reserved(pa.as_u32()) {
            warn!("refusing to free boot-reserved page directory {pa}");
            return Err(VmemError::BootReserved(pa));
        }

        let mut tables = 0usize;
        {
            let dir = self.open(mmu, window)?;
            for (_, entry) in dir.present() {
                // SAFETY: present directory entries point at page tables, and
                // the directory is being torn down, so this is the only handle.
                let table = unsafe { TableFrame::from_page(entry.page()) };
                table.free(mmu, window, frames)?;
                tables += 1;
            }
        }

        frames.free_4k(self.0)?;
        debug!("freed page directory {pa} with {tables} page tables");
        Ok(())
    }
}
