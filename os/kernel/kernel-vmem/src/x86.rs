//! The real MMU of a 32-bit x86 CPU.

use crate::Mmu;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_registers::cr0::Cr0;
use kernel_registers::cr3::Cr3;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

/// `CR0`/`CR3`/`invlpg` backed [`Mmu`]. Ring 0 only.
#[derive(Debug, Default, Copy, Clone)]
pub struct X86Mmu;

impl Mmu for X86Mmu {
    fn paging_enabled(&self) -> bool {
        // SAFETY: ring 0 kernel code.
        unsafe { Cr0::load_unsafe() }.pg_paging()
    }

    fn active_directory(&self) -> Option<PhysicalPage<Size4K>> {
        if !self.paging_enabled() {
            return None;
        }
        // SAFETY: ring 0 kernel code.
        Some(unsafe { Cr3::load_unsafe() }.directory())
    }

    unsafe fn enable_paging(&self, directory: PhysicalPage<Size4K>) {
        unsafe {
            Cr3::from_directory(directory).store_unsafe();
            Cr0::load_unsafe().with_pg_paging(true).store_unsafe();
        }
    }

    unsafe fn switch_directory(&self, directory: PhysicalPage<Size4K>) {
        unsafe { Cr3::from_directory(directory).store_unsafe() }
    }

    fn flush_page(&self, va: VirtualAddress) {
        // SAFETY: invalidating a TLB entry has no memory effects.
        unsafe { kernel_registers::tlb::invlpg(va) }
    }

    unsafe fn deref_physical<'a, T>(&self, pa: PhysicalAddress) -> Option<&'a mut T> {
        if self.paging_enabled() {
            return None;
        }
        // SAFETY: paging is off, so physical == linear; validity is on the caller.
        Some(unsafe { &mut *(pa.as_u32() as usize as *mut T) })
    }

    unsafe fn deref_virtual<'a, T>(&self, va: VirtualAddress) -> &'a mut T {
        unsafe { &mut *(va.as_u32() as usize as *mut T) }
    }
}
