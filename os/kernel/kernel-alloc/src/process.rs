//! # Process address spaces
//!
//! A process gets its own page directory that shares the kernel's table 0 in
//! slot 0 and carries its own recursive last table in slot 1023. User memory
//! is mapped page by page from freshly allocated, zeroed frames:
//!
//! ```text
//! USER_STACK_TOP ┬──────────────┐ 0xC000_0000
//!                │ stack        │ grows down, at most USER_STACK_MAX_PAGES
//!                ├──────────────┤
//!                │              │
//!                ├──────────────┤
//!                │ heap         │ grows up
//! USER_HEAP_BASE ┴──────────────┘ 0x4000_0000
//! ```
//!
//! Everything happens through the temporary window; the new directory never
//! has to be active while it is built or torn down.

use kernel_info::memory::{PAGE_SIZE, USER_HEAP_BASE, USER_STACK_MAX_PAGES, USER_STACK_TOP};
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::recursive::{KERNEL_TABLE_SLOT, SELF_MAP_SLOT, install_self_map};
use kernel_vmem::{
    AddressSpace, DirectoryFrame, FrameAlloc, Mmu, PageDirectory, TableFlags, TableFrame,
    TempWindow, VmemError,
};
use log::{debug, info};

/// Lowest address the stack may reach; the heap stays below it.
const STACK_FLOOR: u32 = USER_STACK_TOP - USER_STACK_MAX_PAGES * PAGE_SIZE;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Vmem(#[from] VmemError),
    #[error("a stack of {0} pages exceeds the limit of {USER_STACK_MAX_PAGES}")]
    StackTooLarge(u32),
    #[error("the heap would grow into the stack area")]
    HeapFull,
}

/// A process's page directory and the user memory mapped into it.
#[derive(Debug)]
pub struct ProcessSpace {
    directory: DirectoryFrame,
    last_table: PhysicalPage<Size4K>,
    stack_pages: u32,
    heap_pages: u32,
}

impl ProcessSpace {
    /// A new directory sharing the active directory's table 0.
    ///
    /// # Errors
    /// - [`VmemError::PagingDisabled`] before paging is on,
    /// - [`VmemError::OutOfMemory`] if the two frames cannot be allocated,
    /// - whatever the temporary window fails with.
    pub fn create<M: Mmu, F: FrameAlloc>(
        mmu: &M,
        window: &TempWindow,
        frames: &mut F,
    ) -> Result<Self, ProcessError> {
        let kernel = mmu.active_directory().ok_or(VmemError::PagingDisabled)?;
        let table0 = {
            // SAFETY: the active directory is a directory; read only.
            let dir = unsafe { window.borrow::<M, PageDirectory>(mmu, kernel)? };
            dir.entry(KERNEL_TABLE_SLOT)
                .filter(|e| e.is_present())
                .map(|e| e.page())
                .ok_or(VmemError::NotMapped(kernel.base()))?
        };

        let root = frames.alloc_4k().ok_or(VmemError::OutOfMemory)?;
        let Some(last_table) = frames.alloc_4k() else {
            frames.release_4k(root);
            return Err(VmemError::OutOfMemory.into());
        };

        match Self::link(mmu, window, root, last_table, table0) {
            Ok(directory) => {
                info!("process directory at {}", root.base());
                Ok(Self {
                    directory,
                    last_table,
                    stack_pages: 0,
                    heap_pages: 0,
                })
            }
            Err(e) => {
                frames.release_4k(last_table);
                frames.release_4k(root);
                Err(e.into())
            }
        }
    }

    fn link<M: Mmu>(
        mmu: &M,
        window: &TempWindow,
        root: PhysicalPage<Size4K>,
        last_table: PhysicalPage<Size4K>,
        table0: PhysicalPage<Size4K>,
    ) -> Result<DirectoryFrame, VmemError> {
        let mut directory = DirectoryFrame::create(mmu, window, root)?;
        let mut last = TableFrame::create(mmu, window, last_table)?;
        {
            let mut d = directory.open(mmu, window)?;
            let mut l = last.open(mmu, window)?;
            install_self_map(&mut d, &mut l, last_table, table0)?;
        }
        Ok(directory)
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.directory.page()
    }

    /// Mapped stack pages.
    #[inline]
    #[must_use]
    pub const fn stack_pages(&self) -> u32 {
        self.stack_pages
    }

    /// One past the last heap byte.
    #[inline]
    #[must_use]
    pub const fn heap_end(&self) -> VirtualAddress {
        VirtualAddress::new(USER_HEAP_BASE + self.heap_pages * PAGE_SIZE)
    }

    /// View of this directory as an [`AddressSpace`].
    #[must_use]
    pub fn address_space<'a, M: Mmu>(
        &self,
        mmu: &'a M,
        window: &'a TempWindow,
    ) -> AddressSpace<'a, M> {
        // SAFETY: the directory was built with the self-map and `self` is its
        // only owner.
        unsafe { AddressSpace::from_root(mmu, window, self.root()) }
    }

    /// Grow the stack to `pages` pages below [`USER_STACK_TOP`] and return the
    /// initial stack pointer. Shrinking is not supported; a smaller `pages`
    /// is a no-op.
    ///
    /// # Errors
    /// - [`ProcessError::StackTooLarge`] beyond [`USER_STACK_MAX_PAGES`],
    /// - [`VmemError::OutOfMemory`] and window failures. Pages mapped before
    ///   the failure stay mapped.
    pub fn map_stack<M: Mmu, F: FrameAlloc>(
        &mut self,
        mmu: &M,
        window: &TempWindow,
        frames: &mut F,
        pages: u32,
    ) -> Result<VirtualAddress, ProcessError> {
        if pages > USER_STACK_MAX_PAGES {
            return Err(ProcessError::StackTooLarge(pages));
        }
        while self.stack_pages < pages {
            let va = VirtualAddress::new(USER_STACK_TOP - (self.stack_pages + 1) * PAGE_SIZE);
            self.map_fresh(mmu, window, frames, va)?;
            self.stack_pages += 1;
        }
        debug!("stack of {} at {} is {pages} pages", self.root(), VirtualAddress::new(USER_STACK_TOP));
        Ok(VirtualAddress::new(USER_STACK_TOP))
    }

    /// Map `pages` more heap pages and return the new heap end.
    ///
    /// # Errors
    /// - [`ProcessError::HeapFull`] if the heap would reach the stack area,
    /// - [`VmemError::OutOfMemory`] and window failures. Pages mapped before
    ///   the failure stay mapped.
    pub fn grow_heap<M: Mmu, F: FrameAlloc>(
        &mut self,
        mmu: &M,
        window: &TempWindow,
        frames: &mut F,
        pages: u32,
    ) -> Result<VirtualAddress, ProcessError> {
        let target = self
            .heap_pages
            .checked_add(pages)
            .filter(|p| {
                u64::from(USER_HEAP_BASE) + u64::from(*p) * u64::from(PAGE_SIZE)
                    <= u64::from(STACK_FLOOR)
            })
            .ok_or(ProcessError::HeapFull)?;

        while self.heap_pages < target {
            self.map_fresh(mmu, window, frames, self.heap_end())?;
            self.heap_pages += 1;
        }
        Ok(self.heap_end())
    }

    /// Load `CR3` with this directory.
    ///
    /// # Safety
    /// Temporary mappings taken under the previous directory are invalid
    /// afterwards.
    pub unsafe fn activate<M: Mmu>(&self, mmu: &M) {
        // SAFETY: table 0 is shared, so the kernel stays mapped.
        unsafe { mmu.switch_directory(self.root()) };
    }

    /// Return every frame this process owns: user pages, page tables, the
    /// last table and the directory. The shared table 0 is left alone.
    ///
    /// # Errors
    /// - [`VmemError::ActiveDirectory`] while the directory is active (nothing
    ///   is touched),
    /// - whatever the window or the frame allocator fail with.
    pub fn destroy<M: Mmu, F: FrameAlloc>(
        mut self,
        mmu: &M,
        window: &TempWindow,
        frames: &mut F,
    ) -> Result<(), ProcessError> {
        let root = self.root();
        if mmu.active_directory() == Some(root) {
            return Err(VmemError::ActiveDirectory(root.base()).into());
        }

        {
            let mut d = self.directory.open(mmu, window)?;
            d.clear_entry(KERNEL_TABLE_SLOT)?;
            d.clear_entry(SELF_MAP_SLOT)?;
        }
        self.directory.free(mmu, window, frames)?;
        frames.free_4k(self.last_table)?;
        info!("process directory at {} destroyed", root.base());
        Ok(())
    }

    /// Map a zeroed frame at `va`. The frame is returned on failure.
    fn map_fresh<M: Mmu, F: FrameAlloc>(
        &self,
        mmu: &M,
        window: &TempWindow,
        frames: &mut F,
        va: VirtualAddress,
    ) -> Result<(), VmemError> {
        let page = frames.alloc_4k().ok_or(VmemError::OutOfMemory)?;
        let result = Self::zero(mmu, window, page).and_then(|()| {
            self.address_space(mmu, window)
                .map_one(frames, va.page(), page, TableFlags::USER)
        });
        if result.is_err() {
            frames.release_4k(page);
        }
        result
    }

    fn zero<M: Mmu>(
        mmu: &M,
        window: &TempWindow,
        page: PhysicalPage<Size4K>,
    ) -> Result<(), VmemError> {
        // SAFETY: a frame we just allocated, viewed as plain words.
        let mut words = unsafe { window.borrow::<M, [u32; 1024]>(mmu, page)? };
        words.fill(0);
        Ok(())
    }
}
