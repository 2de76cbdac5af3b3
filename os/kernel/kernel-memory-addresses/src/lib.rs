//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw 32-bit memory addresses and page bases used
//! in the paging and physical memory code.
//!
//! ## Overview
//!
//! This module defines a minimal set of types that prevent mixing virtual and
//! physical addresses at compile time while remaining zero-cost wrappers around
//! `u32` values.
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | – | A raw 32-bit address, either physical or virtual. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`MemoryAddressOffset<S>`] | [`S: PageSize`](PageSize) | An offset within a page of size `S`. |
//!
//! These are then wrapped to distinguish between virtual and physical spaces:
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Refer to virtual (page-table translated) memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Refer to physical memory or MMIO regions. |
//!
//! ## Page Sizes
//!
//! - [`Size4K`]: 4 KiB pages, the granularity of every mapping.
//! - [`Size4M`]: the 4 MiB span addressed by one page-directory entry.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0040_1234);
//! let (page, off) = va.split::<Size4K>();
//! assert_eq!(page.base().as_u32(), 0x0040_1000);
//! assert_eq!(page.join(off), va);
//!
//! assert_eq!(va.directory_index(), 1);
//! assert_eq!(va.table_index(), 1);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod memory_address;
mod memory_address_offset;
mod memory_page;
mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use memory_address_offset::MemoryAddressOffset;
pub use memory_page::MemoryPage;
pub use page_size::{PageSize, Size4K, Size4M};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join_4k() {
        let a = MemoryAddress::new(0x89AB_CDEF);
        let (p, o) = a.split::<Size4K>();
        assert_eq!(p.base().as_u32() & 0xFFF, 0);
        assert_eq!(o.as_u32(), 0xDEF);
        assert_eq!(p.join(o), a);
    }

    #[test]
    fn split_and_join_4m() {
        let a = MemoryAddress::new(0x0081_2345);
        let (p, o) = a.split::<Size4M>();
        assert_eq!(p.base().as_u32(), 0x0080_0000);
        assert_eq!(o.as_u32(), 0x1_2345);
        assert_eq!(p.join(o), a);
    }

    #[test]
    fn virtual_vs_physical_wrappers() {
        let va = VirtualAddress::new(0xC000_1234);
        let (vp, vo) = va.split::<Size4K>();
        assert_eq!(vp.base().as_u32(), 0xC000_1000);
        assert_eq!(vo.as_u32(), 0x234);
        assert_eq!(vp.join(vo), va);

        let pa = PhysicalAddress::new(0x0010_2042);
        let (pp, po) = pa.split::<Size4K>();
        assert_eq!(pp.number(), 0x102);
        assert_eq!(po.as_u32(), 0x42);
        assert_eq!(pp.join(po), pa);
    }

    #[test]
    fn alignment_helpers() {
        let a = MemoryAddress::new(0x12345);
        assert_eq!(a.align_down::<Size4K>().as_u32(), 0x12000);
        assert_eq!(a.checked_align_up::<Size4K>(), Some(MemoryAddress::new(0x13000)));
        assert_eq!(MemoryAddress::new(0xFFFF_F001).checked_align_up::<Size4K>(), None);
        assert!(MemoryAddress::new(0x4000).is_aligned::<Size4K>());
        assert!(!MemoryAddress::new(0x4001).is_aligned::<Size4K>());
    }

    #[test]
    fn directory_and_table_indices() {
        for (dir, table) in [(0u16, 0u16), (0, 1023), (1, 0), (768, 5), (1023, 1023)] {
            let va = VirtualAddress::from_indices(dir, table);
            assert_eq!(va.directory_index(), dir);
            assert_eq!(va.table_index(), table);
        }
        assert_eq!(VirtualAddress::from_indices(1023, 0).as_u32(), 0xFFC0_0000);
        assert_eq!(VirtualAddress::from_indices(1023, 1023).as_u32(), 0xFFFF_F000);
    }

    #[test]
    fn page_conversion_requires_alignment() {
        assert!(PhysicalPage::<Size4K>::try_from(PhysicalAddress::new(0x2000)).is_ok());
        assert_eq!(
            PhysicalPage::<Size4K>::try_from(PhysicalAddress::new(0x2004)),
            Err(PhysicalAddress::new(0x2004))
        );
        assert!(VirtualPage::<Size4K>::try_from(VirtualAddress::new(0x9F001)).is_err());
    }

    #[test]
    fn checked_add_detects_wraparound() {
        assert_eq!(PhysicalAddress::new(0xFFFF_F000).checked_add(0x1000), None);
        assert_eq!(
            VirtualAddress::new(0x1000).checked_add(0x1000),
            Some(VirtualAddress::new(0x2000))
        );
    }
}
