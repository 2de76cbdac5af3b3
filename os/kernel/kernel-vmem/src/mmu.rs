use crate::VmemError;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use log::warn;

/// The paging hardware as seen by the memory code.
///
/// This is the single place where integers become pointers. Everything else
/// in the kernel reaches memory through [`deref_physical`](Mmu::deref_physical)
/// (paging disabled) or [`deref_virtual`](Mmu::deref_virtual) (paging enabled).
///
/// The kernel uses [`X86Mmu`](crate::X86Mmu); host tests use
/// [`SimulatedMmu`](crate::testing::SimulatedMmu).
pub trait Mmu {
    /// `CR0.PG`.
    fn paging_enabled(&self) -> bool;

    /// The directory in `CR3`, if paging is enabled.
    fn active_directory(&self) -> Option<PhysicalPage<Size4K>>;

    /// Load `CR3` with `directory` and set `CR0.PG`.
    ///
    /// # Safety
    /// `directory` must identity map the executing code, the stack and every
    /// structure the caller touches afterwards.
    unsafe fn enable_paging(&self, directory: PhysicalPage<Size4K>);

    /// Load `CR3` with `directory`.
    ///
    /// # Safety
    /// Same as [`enable_paging`](Mmu::enable_paging). Any temporary mapping
    /// obtained under the previous directory is invalid afterwards.
    unsafe fn switch_directory(&self, directory: PhysicalPage<Size4K>);

    /// Invalidate the TLB entry for `va`.
    fn flush_page(&self, va: VirtualAddress);

    /// Reference to physical memory. `None` once paging is enabled.
    ///
    /// # Safety
    /// `pa` must hold a valid `T` that nothing else references for `'a`.
    unsafe fn deref_physical<'a, T>(&self, pa: PhysicalAddress) -> Option<&'a mut T>;

    /// Reference to mapped virtual memory.
    ///
    /// # Safety
    /// `va` must be mapped writable in the active directory (or be a physical
    /// address while paging is off), hold a valid `T` and not be referenced
    /// elsewhere for `'a`.
    unsafe fn deref_virtual<'a, T>(&self, va: VirtualAddress) -> &'a mut T;
}

/// Minimal frame allocator used to obtain **physical** 4 KiB frames for page
/// tables and process pages.
///
/// Returned frames **must** be 4 KiB aligned and never zero.
pub trait FrameAlloc {
    /// Allocate one frame, `None` on exhaustion.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Return a frame obtained from [`alloc_4k`](FrameAlloc::alloc_4k).
    ///
    /// # Errors
    /// [`VmemError::FreeRejected`] if the allocator does not own `page` or it
    /// is already free.
    fn free_4k(&mut self, page: PhysicalPage<Size4K>) -> Result<(), VmemError>;

    /// [`free_4k`](FrameAlloc::free_4k) on a rollback path, where a rejection
    /// cannot be handled any better than by logging it.
    fn release_4k(&mut self, page: PhysicalPage<Size4K>) {
        if let Err(e) = self.free_4k(page) {
            warn!("frame {} not taken back: {e}", page.base());
        }
    }
}

impl<F: FrameAlloc + ?Sized> FrameAlloc for &mut F {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        (**self).alloc_4k()
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) -> Result<(), VmemError> {
        (**self).free_4k(page)
    }
}
