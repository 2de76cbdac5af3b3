//! # Address Space (32-bit, directory-rooted)
//!
//! Helpers to build and inspect a **single** virtual address space, active or
//! not. Frames of inactive spaces are reached through the [`TempWindow`].
//!
//! ## Highlights
//!
//! - [`AddressSpace::map_one`] installs one 4 KiB mapping, allocating and
//!   linking the page table (and its self-map mirror) on demand.
//! - [`AddressSpace::unmap_one`] clears a single entry and hands the frame back.
//! - [`AddressSpace::query`] / [`translate`] resolve a virtual address.
//! - [`AddressSpace::activate`] loads `CR3`.
//!
//! ## Design
//!
//! - Every directory handled here carries the recursive self-map (see
//!   [`recursive`](crate::recursive)); linking a table always mirrors it into
//!   the last table.
//! - Leaf flags come from the caller; `PRESENT` is always added. A directory
//!   entry gets `USER_SUPERVISOR` only when the first leaf asking for it
//!   creates the table.
//! - When the space is active, each modified page is flushed with `invlpg`.

use crate::recursive::{SELF_MAP_SLOT, link_table};
use crate::{
    DirectoryFlags, FrameAlloc, Mmu, PageDirectory, PageTable, TableFlags, TableFrame, TempWindow,
    VmemError,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, VirtualPage};
use log::trace;

/// Handle to a single, concrete address space.
pub struct AddressSpace<'a, M: Mmu> {
    root: PhysicalPage<Size4K>,
    mmu: &'a M,
    window: &'a TempWindow,
}

impl<'a, M: Mmu> AddressSpace<'a, M> {
    /// View the space rooted at `root`.
    ///
    /// # Safety
    /// `root` must hold a page directory with the recursive self-map
    /// installed, and nothing else may edit it while this handle is used.
    #[inline]
    pub const unsafe fn from_root(
        mmu: &'a M,
        window: &'a TempWindow,
        root: PhysicalPage<Size4K>,
    ) -> Self {
        Self { root, mmu, window }
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    /// Whether this is the directory in `CR3`.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.mmu.active_directory() == Some(self.root)
    }

    /// Load `CR3` with this space's root.
    ///
    /// # Safety
    /// The space must map the executing kernel (it does when it shares
    /// table 0). Temporary mappings from the previous space are invalid
    /// afterwards.
    #[inline]
    pub unsafe fn activate(&self) {
        unsafe { self.mmu.switch_directory(self.root) }
    }

    /// Map the 4 KiB page `va` to `pa`.
    ///
    /// # Errors
    /// - [`VmemError::OutOfMemory`] if a page table was needed and none could be allocated,
    /// - [`VmemError::IndexOutOfRange`] for `va` inside the self-map,
    /// - whatever the temporary window fails with.
    pub fn map_one<F: FrameAlloc>(
        &self,
        frames: &mut F,
        va: VirtualPage<Size4K>,
        pa: PhysicalPage<Size4K>,
        flags: TableFlags,
    ) -> Result<(), VmemError> {
        let base = va.base();
        let di = usize::from(base.directory_index());
        let ti = usize::from(base.table_index());
        if di == SELF_MAP_SLOT {
            return Err(VmemError::IndexOutOfRange(di));
        }

        let table = self.ensure_table(frames, di, flags)?;
        {
            // SAFETY: `table` is linked into this directory, which we own.
            let mut t = unsafe { self.window.borrow::<M, PageTable>(self.mmu, table)? };
            t.set(ti, pa.base(), flags | TableFlags::PRESENT)?;
        }
        if self.is_active() {
            self.mmu.flush_page(base);
        }
        trace!("mapped {base} -> {} in {}", pa.base(), self.root);
        Ok(())
    }

    /// Clear the mapping of `va` and return the frame it pointed at.
    ///
    /// Page tables are kept even when they become empty.
    ///
    /// # Errors
    /// Whatever the temporary window fails with.
    pub fn unmap_one(
        &self,
        va: VirtualPage<Size4K>,
    ) -> Result<Option<PhysicalPage<Size4K>>, VmemError> {
        let base = va.base();
        let Some(table) = self.table_of(base)? else {
            return Ok(None);
        };
        let ti = usize::from(base.table_index());

        let old = {
            // SAFETY: `table` is linked into this directory.
            let mut t = unsafe { self.window.borrow::<M, PageTable>(self.mmu, table)? };
            let old = t.entry(ti).filter(|e| e.is_present());
            t.clear_entry(ti)?;
            old
        };
        if old.is_some() && self.is_active() {
            self.mmu.flush_page(base);
        }
        Ok(old.map(|e| e.page()))
    }

    /// Translate `va`, `None` if not mapped.
    ///
    /// # Errors
    /// Whatever the temporary window fails with.
    pub fn query(&self, va: VirtualAddress) -> Result<Option<PhysicalAddress>, VmemError> {
        translate(self.mmu, self.window, self.root, va)
    }

    /// Frame of the page table covering `va`, if linked.
    fn table_of(
        &self,
        va: VirtualAddress,
    ) -> Result<Option<PhysicalPage<Size4K>>, VmemError> {
        // SAFETY: the root is a directory per `from_root`; the view is dropped here.
        let dir = unsafe { self.window.borrow::<M, PageDirectory>(self.mmu, self.root)? };
        Ok(dir
            .entry(usize::from(va.directory_index()))
            .filter(|e| e.is_present())
            .map(|e| e.page()))
    }

    /// Frame of the page table for directory slot `di`, creating it if absent.
    fn ensure_table<F: FrameAlloc>(
        &self,
        frames: &mut F,
        di: usize,
        leaf_flags: TableFlags,
    ) -> Result<PhysicalPage<Size4K>, VmemError> {
        // SAFETY: the root is a directory per `from_root`.
        let mut dir = unsafe { self.window.borrow::<M, PageDirectory>(self.mmu, self.root)? };
        if let Some(e) = dir.entry(di).filter(|e| e.is_present()) {
            return Ok(e.page());
        }

        let page = frames.alloc_4k().ok_or(VmemError::OutOfMemory)?;
        let table = match TableFrame::create(self.mmu, self.window, page) {
            Ok(table) => table.into_page(),
            Err(e) => {
                frames.release_4k(page);
                return Err(e);
            }
        };

        let dir_flags = if leaf_flags.contains(TableFlags::USER_SUPERVISOR) {
            DirectoryFlags::USER
        } else {
            DirectoryFlags::KERNEL
        };
        let last_page = dir
            .entry(SELF_MAP_SLOT)
            .filter(|e| e.is_present())
            .map(|e| e.page())
            .ok_or(VmemError::NotMapped(self.root.base()))?;
        // SAFETY: the self-map slot of our directory holds its last table.
        let mut last = unsafe { self.window.borrow::<M, PageTable>(self.mmu, last_page)? };
        link_table(&mut dir, &mut last, di, table, dir_flags)?;
        trace!("linked page table {} at slot {di} of {}", table.base(), self.root);
        Ok(table)
    }
}

/// Resolve `va` through the (possibly inactive) directory `dir`.
///
/// # Errors
/// Whatever the temporary window fails with.
pub fn translate<M: Mmu>(
    mmu: &M,
    window: &TempWindow,
    dir: PhysicalPage<Size4K>,
    va: VirtualAddress,
) -> Result<Option<PhysicalAddress>, VmemError> {
    let pde = {
        // SAFETY: read-only view, dropped before the next borrow.
        let d = unsafe { window.borrow::<M, PageDirectory>(mmu, dir)? };
        d.entry(usize::from(va.directory_index()))
    };
    let Some(pde) = pde.filter(|e| e.is_present()) else {
        return Ok(None);
    };

    let pte = {
        // SAFETY: present directory entries point at page tables.
        let t = unsafe { window.borrow::<M, PageTable>(mmu, pde.page())? };
        t.entry(usize::from(va.table_index()))
    };
    Ok(pte
        .filter(|e| e.is_present())
        .map(|e| e.page().join(va.offset::<Size4K>())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recursive::install_self_map;
    use crate::testing::{BumpFrames, SimulatedMmu};
    use crate::DirectoryFrame;
    use kernel_info::memory::VirtualLayout;

    const BOOT_DIR: u32 = 1;
    const TABLE0: u32 = 0x10;
    const BOOT_LAST: u32 = 0x11;

    struct Fixture {
        mmu: SimulatedMmu,
        window: TempWindow,
        frames: BumpFrames,
    }

    fn booted() -> Fixture {
        let mmu = SimulatedMmu::new();
        mmu.bootstrap(
            PhysicalPage::from_number(BOOT_DIR),
            PhysicalPage::from_number(TABLE0),
            PhysicalPage::from_number(BOOT_LAST),
        );
        let window = TempWindow::new(&VirtualLayout::DEFAULT);
        window.init();
        Fixture {
            mmu,
            window,
            frames: BumpFrames::new(0x0040_0000, 0x0080_0000),
        }
    }

    /// A fresh directory sharing table 0, with its own last table.
    fn fresh_directory(f: &mut Fixture) -> PhysicalPage<Size4K> {
        let root = f.frames.alloc_4k().unwrap();
        let last = f.frames.alloc_4k().unwrap();
        let mut dir = DirectoryFrame::create(&f.mmu, &f.window, root).unwrap();
        let mut last_table = TableFrame::create(&f.mmu, &f.window, last).unwrap();
        {
            let mut d = dir.open(&f.mmu, &f.window).unwrap();
            let mut l = last_table.open(&f.mmu, &f.window).unwrap();
            install_self_map(&mut d, &mut l, last, PhysicalPage::from_number(TABLE0)).unwrap();
        }
        root
    }

    fn vpage(va: u32) -> VirtualPage<Size4K> {
        VirtualPage::from_addr(VirtualAddress::new(va))
    }

    #[test]
    fn maps_into_an_inactive_directory() {
        let mut f = booted();
        let root = fresh_directory(&mut f);
        // SAFETY: freshly built with the self-map.
        let space = unsafe { AddressSpace::from_root(&f.mmu, &f.window, root) };
        assert!(!space.is_active());

        let pa = PhysicalPage::from_number(0x900);
        space
            .map_one(&mut f.frames, vpage(0x4000_0000), pa, TableFlags::USER)
            .unwrap();

        assert_eq!(
            space.query(VirtualAddress::new(0x4000_0123)).unwrap(),
            Some(PhysicalAddress::new(0x0090_0123))
        );
        assert_eq!(space.query(VirtualAddress::new(0x4000_1000)).unwrap(), None);
        assert_eq!(f.mmu.walk(VirtualAddress::new(0x4000_0000)), None);
        assert_eq!(f.window.available(), 25);
    }

    #[test]
    fn new_tables_are_mirrored_into_the_last_table() {
        let mut f = booted();
        let root = fresh_directory(&mut f);
        // SAFETY: freshly built with the self-map.
        let space = unsafe { AddressSpace::from_root(&f.mmu, &f.window, root) };
        space
            .map_one(
                &mut f.frames,
                vpage(0x0080_0000),
                PhysicalPage::from_number(0x901),
                TableFlags::KERNEL,
            )
            .unwrap();

        // SAFETY: root holds a directory.
        let dir = unsafe { f.window.borrow::<_, PageDirectory>(&f.mmu, root) }.unwrap();
        let table = dir.entry(2).unwrap();
        assert!(table.is_present());
        assert!(!table.flags().contains(DirectoryFlags::USER_SUPERVISOR));

        let last = dir.entry(SELF_MAP_SLOT).unwrap().page();
        // SAFETY: the self-map slot holds a table.
        let last = unsafe { f.window.borrow::<_, PageTable>(&f.mmu, last) }.unwrap();
        assert_eq!(last.addr(2), table.addr());
    }

    #[test]
    fn user_leaf_creates_a_user_directory_entry() {
        let mut f = booted();
        let root = fresh_directory(&mut f);
        // SAFETY: freshly built with the self-map.
        let space = unsafe { AddressSpace::from_root(&f.mmu, &f.window, root) };
        space
            .map_one(
                &mut f.frames,
                vpage(0xBFFF_F000),
                PhysicalPage::from_number(0x902),
                TableFlags::USER,
            )
            .unwrap();

        // SAFETY: root holds a directory.
        let dir = unsafe { f.window.borrow::<_, PageDirectory>(&f.mmu, root) }.unwrap();
        assert_eq!(dir.flags(0x2FF), DirectoryFlags::USER);
    }

    #[test]
    fn unmap_returns_the_frame() {
        let mut f = booted();
        let root = fresh_directory(&mut f);
        // SAFETY: freshly built with the self-map.
        let space = unsafe { AddressSpace::from_root(&f.mmu, &f.window, root) };
        let pa = PhysicalPage::from_number(0x903);
        space
            .map_one(&mut f.frames, vpage(0x4000_2000), pa, TableFlags::USER)
            .unwrap();

        assert_eq!(space.unmap_one(vpage(0x4000_2000)).unwrap(), Some(pa));
        assert_eq!(space.unmap_one(vpage(0x4000_2000)).unwrap(), None);
        assert_eq!(space.unmap_one(vpage(0x7000_0000)).unwrap(), None);
        assert_eq!(space.query(VirtualAddress::new(0x4000_2000)).unwrap(), None);
    }

    #[test]
    fn the_self_map_slot_is_off_limits() {
        let mut f = booted();
        let root = fresh_directory(&mut f);
        // SAFETY: freshly built with the self-map.
        let space = unsafe { AddressSpace::from_root(&f.mmu, &f.window, root) };
        assert_eq!(
            space.map_one(
                &mut f.frames,
                vpage(0xFFC0_0000),
                PhysicalPage::from_number(0x904),
                TableFlags::KERNEL,
            ),
            Err(VmemError::IndexOutOfRange(SELF_MAP_SLOT))
        );
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut f = booted();
        let root = fresh_directory(&mut f);
        let mut empty = BumpFrames::new(0, 0);
        // SAFETY: freshly built with the self-map.
        let space = unsafe { AddressSpace::from_root(&f.mmu, &f.window, root) };
        assert_eq!(
            space.map_one(
                &mut empty,
                vpage(0x4000_0000),
                PhysicalPage::from_number(0x905),
                TableFlags::USER,
            ),
            Err(VmemError::OutOfMemory)
        );
    }

    #[test]
    fn active_space_is_visible_and_flushed() {
        let mut f = booted();
        let root = fresh_directory(&mut f);
        // SAFETY: freshly built with the self-map.
        let space = unsafe { AddressSpace::from_root(&f.mmu, &f.window, root) };
        // SAFETY: it shares table 0 with the boot directory.
        unsafe { space.activate() };
        assert!(space.is_active());

        let va = VirtualAddress::new(0x4000_5000);
        space
            .map_one(
                &mut f.frames,
                va.page(),
                PhysicalPage::from_number(0x906),
                TableFlags::USER,
            )
            .unwrap();

        assert_eq!(f.mmu.walk(va), Some(PhysicalAddress::new(0x0090_6000)));
        assert!(f.mmu.flushed().contains(&va));

        // The new table is reachable through the recursive slot.
        // SAFETY: slot 0x100 was just linked.
        let table = unsafe { crate::recursive::active_table_mut(&f.mmu, 0x100) };
        assert_eq!(table.addr(5), PhysicalAddress::new(0x0090_6000));
    }
}
