//! # Paging entry codec
//!
//! A 32-bit paging entry packs a 4 KiB-aligned physical frame address into
//! bits `31..12` and flags into bits `11..0`:
//!
//! | Bits   | Directory entry        | Table entry            |
//! |--------|------------------------|------------------------|
//! | 0      | `PRESENT`              | `PRESENT`              |
//! | 1      | `READ_WRITE`           | `READ_WRITE`           |
//! | 2      | `USER_SUPERVISOR`      | `USER_SUPERVISOR`      |
//! | 3      | `WRITE_THROUGH`        | `WRITE_THROUGH`        |
//! | 4      | `CACHE_DISABLE`        | `CACHE_DISABLE`        |
//! | 5      | `ACCESSED`             | `ACCESSED`             |
//! | 6      | (ignored)              | `DIRTY`                |
//! | 7      | `PAGE_SIZE` (4 MiB)    | `PAT`                  |
//! | 8      | (ignored)              | `GLOBAL`               |
//! | 9–11   | available to software  | available to software  |
//! | 12–31  | page table frame       | page frame             |
//!
//! Both halves are stored through [`bitfield_struct`] accessors, so updating
//! the address never touches the flags and vice versa. Inputs are masked
//! before they are stored: an unaligned address loses its low 12 bits and
//! flags lose everything above bit 11.

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Low 12 bits of an entry.
pub const FLAGS_MASK: u32 = 0x0000_0FFF;

/// High 20 bits of an entry.
pub const ADDRESS_MASK: u32 = !FLAGS_MASK;

bitflags::bitflags! {
    /// Page-directory entry flags.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct DirectoryFlags: u32 {
        /// The entry points at a page table.
        const PRESENT         = 1 << 0;
        /// Writes allowed anywhere in the 4 MiB span (subject to the table entry).
        const READ_WRITE      = 1 << 1;
        /// Ring 3 may access the span (subject to the table entry).
        const USER_SUPERVISOR = 1 << 2;
        /// Write-through caching of the page table.
        const WRITE_THROUGH   = 1 << 3;
        /// Caching of the page table disabled.
        const CACHE_DISABLE   = 1 << 4;
        /// Set by the CPU when the entry was used in a walk.
        const ACCESSED        = 1 << 5;
        /// The entry maps a 4 MiB page directly. Never set by this kernel.
        const PAGE_SIZE       = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Page-table entry flags.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct TableFlags: u32 {
        /// The entry maps a page.
        const PRESENT         = 1 << 0;
        /// The page is writable.
        const READ_WRITE      = 1 << 1;
        /// Ring 3 may access the page.
        const USER_SUPERVISOR = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH   = 1 << 3;
        /// Caching disabled (MMIO).
        const CACHE_DISABLE   = 1 << 4;
        /// Set by the CPU on access.
        const ACCESSED        = 1 << 5;
        /// Set by the CPU on the first write.
        const DIRTY           = 1 << 6;
        /// Page attribute table index bit.
        const PAT             = 1 << 7;
        /// Survives CR3 reloads when CR4.PGE is set.
        const GLOBAL          = 1 << 8;
    }
}

impl DirectoryFlags {
    /// Flags for a kernel-only page table link.
    pub const KERNEL: Self = Self::PRESENT.union(Self::READ_WRITE);
    /// Flags for a page table that also holds user mappings.
    pub const USER: Self = Self::KERNEL.union(Self::USER_SUPERVISOR);
}

impl TableFlags {
    /// Supervisor read/write page.
    pub const KERNEL: Self = Self::PRESENT.union(Self::READ_WRITE);
    /// User read/write page.
    pub const USER: Self = Self::KERNEL.union(Self::USER_SUPERVISOR);
}

/// A page-directory entry (PDE).
#[doc(alias = "PDE")]
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct DirectoryEntry {
    #[bits(12)]
    raw_flags: u32,
    #[bits(20)]
    frame_number: u32,
}

/// A page-table entry (PTE).
#[doc(alias = "PTE")]
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct TableEntry {
    #[bits(12)]
    raw_flags: u32,
    #[bits(20)]
    frame_number: u32,
}

impl DirectoryEntry {
    /// Entry pointing at `table` with `flags`.
    #[inline]
    #[must_use]
    pub const fn make(table: PhysicalPage<Size4K>, flags: DirectoryFlags) -> Self {
        let mut e = Self::new();
        e.set_addr(table.base());
        e.set_flags(flags);
        e
    }

    /// Address half, always page aligned.
    #[inline]
    #[must_use]
    pub const fn addr(self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_number() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_number(self.frame_number())
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> DirectoryFlags {
        DirectoryFlags::from_bits_retain(self.raw_flags())
    }

    /// Replace the address half; the low 12 bits of `pa` are dropped.
    #[inline]
    pub const fn set_addr(&mut self, pa: PhysicalAddress) {
        *self = self.with_frame_number(pa.as_u32() >> 12);
    }

    /// Replace the flag half; bits above 11 are dropped.
    #[inline]
    pub const fn set_flags(&mut self, flags: DirectoryFlags) {
        *self = self.with_raw_flags(flags.bits() & FLAGS_MASK);
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.flags().contains(DirectoryFlags::PRESENT)
    }
}

impl TableEntry {
    /// Entry mapping `page` with `flags`.
    #[inline]
    #[must_use]
    pub const fn make(page: PhysicalPage<Size4K>, flags: TableFlags) -> Self {
        let mut e = Self::new();
        e.set_addr(page.base());
        e.set_flags(flags);
        e
    }

    #[inline]
    #[must_use]
    pub const fn addr(self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_number() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_number(self.frame_number())
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> TableFlags {
        TableFlags::from_bits_retain(self.raw_flags())
    }

    #[inline]
    pub const fn set_addr(&mut self, pa: PhysicalAddress) {
        *self = self.with_frame_number(pa.as_u32() >> 12);
    }

    #[inline]
    pub const fn set_flags(&mut self, flags: TableFlags) {
        *self = self.with_raw_flags(flags.bits() & FLAGS_MASK);
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.flags().contains(TableFlags::PRESENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_do_not_disturb_each_other() {
        let mut e = TableEntry::new();
        e.set_addr(PhysicalAddress::new(0x0040_2000));
        e.set_flags(TableFlags::KERNEL | TableFlags::GLOBAL);
        assert_eq!(e.into_bits(), 0x0040_2103);

        e.set_flags(TableFlags::PRESENT);
        assert_eq!(e.addr(), PhysicalAddress::new(0x0040_2000));

        e.set_addr(PhysicalAddress::new(0xFFFF_F000));
        assert_eq!(e.flags(), TableFlags::PRESENT);
        assert_eq!(e.into_bits(), 0xFFFF_F001);
    }

    #[test]
    fn inputs_are_masked() {
        let mut e = DirectoryEntry::new();
        e.set_addr(PhysicalAddress::new(0x0000_3ABC));
        assert_eq!(e.addr(), PhysicalAddress::new(0x3000));
        e.set_flags(DirectoryFlags::from_bits_retain(0xFFFF_F003));
        assert_eq!(e.flags().bits(), 0xFFF);
        assert_eq!(e.addr(), PhysicalAddress::new(0x3000));
    }

    #[test]
    fn every_flag_value_round_trips() {
        for raw in 0..4096u32 {
            let mut e = TableEntry::new();
            e.set_addr(PhysicalAddress::new(0x00AB_C000));
            e.set_flags(TableFlags::from_bits_retain(raw));
            assert_eq!(e.flags().bits(), raw);
            assert_eq!(e.addr().as_u32(), 0x00AB_C000);
        }
    }

    #[test]
    fn present_follows_the_flag() {
        let table = PhysicalPage::<Size4K>::from_number(2);
        assert!(DirectoryEntry::make(table, DirectoryFlags::KERNEL).is_present());
        assert!(!DirectoryEntry::make(table, DirectoryFlags::READ_WRITE).is_present());
        assert!(!TableEntry::new().is_present());
        assert_eq!(
            DirectoryEntry::make(table, DirectoryFlags::USER).into_bits(),
            0x2007
        );
    }
}
