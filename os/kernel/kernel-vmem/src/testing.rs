//! # Host-side paging simulation
//!
//! [`SimulatedMmu`] stands in for the CPU in host tests:
//!
//! - physical RAM is sparse; a 4 KiB frame springs into existence (zeroed) the
//!   first time it is touched,
//! - `CR0.PG` and `CR3` are plain cells,
//! - with paging on, [`Mmu::deref_virtual`] performs the two-level walk
//!   through the *active* simulated directory. A not-present entry on the way
//!   panics, which is how a page fault shows up in a test.
//!
//! [`BumpFrames`] is a trivial [`FrameAlloc`] for tests that do not involve the
//! region allocator.

extern crate alloc;

use crate::{DirectoryEntry, DirectoryFlags, FrameAlloc, Mmu, TableEntry, TableFlags, VmemError};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell, UnsafeCell};
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// A 4 KiB-aligned raw frame of simulated RAM.
#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; 4096]>);

/// A CPU with paging hardware and sparse physical memory.
pub struct SimulatedMmu {
    frames: RefCell<BTreeMap<u32, Box<Frame>>>,
    paging: Cell<bool>,
    cr3: Cell<u32>,
    flushes: RefCell<Vec<VirtualAddress>>,
}

impl Default for SimulatedMmu {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMmu {
    /// Paging off, no RAM touched yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: RefCell::new(BTreeMap::new()),
            paging: Cell::new(false),
            cr3: Cell::new(0),
            flushes: RefCell::new(Vec::new()),
        }
    }

    /// Pointer to the byte at `pa`. Frames are boxed and never dropped before
    /// the simulator, so the pointer stays valid for its lifetime.
    fn phys_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let (page, offset) = pa.split::<Size4K>();
        let mut frames = self.frames.borrow_mut();
        let frame = frames
            .entry(page.number())
            .or_insert_with(|| Box::new(Frame(UnsafeCell::new([0; 4096]))));
        // SAFETY: offset < 4096.
        unsafe { frame.0.get().cast::<u8>().add(offset.as_u32() as usize) }
    }

    /// Read a word of physical memory.
    #[must_use]
    pub fn read_u32(&self, pa: PhysicalAddress) -> u32 {
        assert!(pa.offset::<Size4K>().as_u32() <= 4092, "word straddles a frame");
        // SAFETY: inside one frame; unaligned read tolerated.
        unsafe { self.phys_ptr(pa).cast::<u32>().read_unaligned() }
    }

    /// Write a word of physical memory.
    pub fn write_u32(&self, pa: PhysicalAddress, value: u32) {
        assert!(pa.offset::<Size4K>().as_u32() <= 4092, "word straddles a frame");
        // SAFETY: inside one frame.
        unsafe { self.phys_ptr(pa).cast::<u32>().write_unaligned(value) }
    }

    /// Number of frames touched so far.
    #[must_use]
    pub fn touched_frames(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Every address passed to [`Mmu::flush_page`], oldest first.
    #[must_use]
    pub fn flushed(&self) -> Vec<VirtualAddress> {
        self.flushes.borrow().clone()
    }

    /// Walk the active directory. `None` if paging is off or a level is absent.
    #[must_use]
    pub fn walk(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        if !self.paging.get() {
            return None;
        }
        let dir = PhysicalAddress::new(self.cr3.get());
        let pde = DirectoryEntry::from_bits(
            self.read_u32(dir + u32::from(va.directory_index()) * 4),
        );
        if !pde.is_present() {
            return None;
        }
        let pte = TableEntry::from_bits(
            self.read_u32(pde.addr() + u32::from(va.table_index()) * 4),
        );
        if !pte.is_present() {
            return None;
        }
        Some(pte.page().join(va.offset::<Size4K>()))
    }

    /// Build the smallest directory the kernel can run on: slot 0 links
    /// `table0`, slot 1023 links `last`, the last table mirrors both, and
    /// nothing else is mapped. Then enable paging on it.
    ///
    /// Tests of the window and of address spaces start from here when they do
    /// not want the full boot mapping.
    pub fn bootstrap(
        &self,
        dir: PhysicalPage<Size4K>,
        table0: PhysicalPage<Size4K>,
        last: PhysicalPage<Size4K>,
    ) {
        let kernel = DirectoryFlags::KERNEL;
        let table_flags = TableFlags::KERNEL;
        self.write_u32(dir.base(), DirectoryEntry::make(table0, kernel).into_bits());
        self.write_u32(dir.base() + 1023 * 4, DirectoryEntry::make(last, kernel).into_bits());
        self.write_u32(last.base(), TableEntry::make(table0, table_flags).into_bits());
        self.write_u32(last.base() + 1023 * 4, TableEntry::make(last, table_flags).into_bits());
        // SAFETY: simulated hardware.
        unsafe { self.enable_paging(dir) };
    }
}

impl Mmu for SimulatedMmu {
    fn paging_enabled(&self) -> bool {
        self.paging.get()
    }

    fn active_directory(&self) -> Option<PhysicalPage<Size4K>> {
        self.paging
            .get()
            .then(|| PhysicalPage::from_addr(PhysicalAddress::new(self.cr3.get())))
    }

    unsafe fn enable_paging(&self, directory: PhysicalPage<Size4K>) {
        self.cr3.set(directory.base().as_u32());
        self.paging.set(true);
    }

    unsafe fn switch_directory(&self, directory: PhysicalPage<Size4K>) {
        self.cr3.set(directory.base().as_u32());
    }

    fn flush_page(&self, va: VirtualAddress) {
        self.flushes.borrow_mut().push(va);
    }

    unsafe fn deref_physical<'a, T>(&self, pa: PhysicalAddress) -> Option<&'a mut T> {
        if self.paging.get() {
            return None;
        }
        assert!(
            pa.offset::<Size4K>().as_u32() as usize + size_of::<T>() <= Size4K::SIZE as usize,
            "object at {pa} straddles a frame"
        );
        // SAFETY: the frame outlives `'a` as long as the simulator does;
        // exclusivity is on the caller.
        Some(unsafe { &mut *self.phys_ptr(pa).cast::<T>() })
    }

    unsafe fn deref_virtual<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
        let pa = if self.paging.get() {
            self.walk(va)
                .unwrap_or_else(|| panic!("simulated page fault at {va}"))
        } else {
            PhysicalAddress::new(va.as_u32())
        };
        assert!(
            pa.offset::<Size4K>().as_u32() as usize + size_of::<T>() <= Size4K::SIZE as usize,
            "object at {va} straddles a page"
        );
        // SAFETY: as in `deref_physical`.
        unsafe { &mut *self.phys_ptr(pa).cast::<T>() }
    }
}

/// A trivial **bump** allocator: hands out the next 4 KiB frame and records
/// what was freed. Frees are never reused.
pub struct BumpFrames {
    next: u32,
    end: u32,
    freed: Vec<PhysicalPage<Size4K>>,
}

impl BumpFrames {
    /// Frames from `start` (inclusive) to `end` (exclusive), both page aligned.
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self {
            next: start,
            end,
            freed: Vec::new(),
        }
    }

    /// Frames handed back so far, in order.
    #[must_use]
    pub fn freed(&self) -> &[PhysicalPage<Size4K>] {
        &self.freed
    }
}

impl FrameAlloc for BumpFrames {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        if self.next + Size4K::SIZE > self.end {
            return None;
        }
        let p = PhysicalPage::from_addr(PhysicalAddress::new(self.next));
        self.next += Size4K::SIZE;
        Some(p)
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) -> Result<(), VmemError> {
        if self.freed.contains(&page) {
            return Err(VmemError::FreeRejected(page.base()));
        }
        self.freed.push(page);
        Ok(())
    }
}
