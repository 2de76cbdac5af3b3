//! # Region table layout
//!
//! The region table is one 4 KiB page of 512 packed 64-bit entries:
//!
//! | Bits   | Field        |                                          |
//! |--------|--------------|------------------------------------------|
//! | 0      | `present`    | the slot holds a region                  |
//! | 1‒11   | (reserved)   |                                          |
//! | 12‒31  | `base_frame` | first page of the region (its bitmap)    |
//! | 32‒47  | `page_count` | pages covered, bitmap page included      |
//! | 48‒63  | `free_count` | pages currently unallocated              |
//!
//! Each region's first page is its [`Bitmap`]: bit `i` set means page `i`
//! of the region is free. Bit 0 is the bitmap page itself and always clear.

use bitfield_struct::bitfield;
use core::fmt;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Largest region, in pages. One bitmap page has exactly this many bits.
pub const REGION_MAX_PAGES: u32 = 0x8000;

/// Slots in the region table.
pub const REGION_TABLE_CAPACITY: usize = 512;

/// Smallest extent worth a region: the bitmap page plus one usable page.
pub const REGION_MIN_PAGES: u32 = 2;

/// One packed region table slot.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct RegionEntry {
    pub present: bool,
    #[bits(11)]
    __: u16,
    #[bits(20)]
    base_frame: u32,
    pub page_count: u16,
    pub free_count: u16,
}

const _: () = assert!(REGION_MAX_PAGES <= 0xFFFF);

impl RegionEntry {
    /// A present region of `pages` pages at `base`, all but the bitmap page free.
    ///
    /// `pages` must be in `REGION_MIN_PAGES..=REGION_MAX_PAGES`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn fresh(base: PhysicalPage<Size4K>, pages: u32) -> Self {
        debug_assert!(pages >= REGION_MIN_PAGES && pages <= REGION_MAX_PAGES);
        Self::new()
            .with_present(true)
            .with_base_frame(base.number())
            .with_page_count(pages as u16)
            .with_free_count((pages - 1) as u16)
    }

    /// First page of the region, which holds its bitmap.
    #[inline]
    #[must_use]
    pub fn base(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_number(self.base_frame())
    }

    /// One past the last byte of the region, as a 64-bit value so that a
    /// region ending at 4 GiB is representable.
    #[inline]
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::from(self.base().base().as_u32())
            + u64::from(self.page_count()) * u64::from(PAGE_SIZE)
    }

    /// Whether `pa` falls inside the region.
    #[inline]
    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress) -> bool {
        pa.as_u32() >= self.base().base().as_u32() && u64::from(pa.as_u32()) < self.end()
    }
}

/// Backing storage of a region table: exactly one page.
#[repr(C, align(4096))]
pub struct RegionTableStorage {
    pub(crate) entries: [RegionEntry; REGION_TABLE_CAPACITY],
}

const _: () = assert!(size_of::<RegionTableStorage>() == PAGE_SIZE as usize);

impl RegionTableStorage {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [RegionEntry::new(); REGION_TABLE_CAPACITY],
        }
    }
}

impl Default for RegionTableStorage {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// A snapshot of one region, for statistics and logging.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RegionInfo {
    pub base: PhysicalPage<Size4K>,
    pub page_count: u32,
    pub free_count: u32,
}

impl From<RegionEntry> for RegionInfo {
    fn from(e: RegionEntry) -> Self {
        Self {
            base: e.base(),
            page_count: u32::from(e.page_count()),
            free_count: u32::from(e.free_count()),
        }
    }
}

impl fmt::Display for RegionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} pages, {} free",
            self.base.base(),
            self.page_count,
            self.free_count
        )
    }
}

/// Free/used bitmap of one region. Set bit means free.
#[repr(C, align(4096))]
pub(crate) struct Bitmap {
    words: [u32; 1024],
}

const _: () = assert!(size_of::<Bitmap>() * 8 == REGION_MAX_PAGES as usize);

impl Bitmap {
    /// Mark pages `1..pages` free and everything else used.
    pub(crate) fn reset(&mut self, pages: u32) {
        let full = (pages / 32) as usize;
        let rest = pages % 32;
        self.words.fill(0);
        self.words[..full].fill(u32::MAX);
        if rest != 0 {
            self.words[full] = (1 << rest) - 1;
        }
        self.set(0, false);
    }

    #[inline]
    pub(crate) fn is_free(&self, bit: u32) -> bool {
        self.words[(bit / 32) as usize] & (1 << (bit % 32)) != 0
    }

    #[inline]
    pub(crate) fn set(&mut self, bit: u32, free: bool) {
        let word = &mut self.words[(bit / 32) as usize];
        if free {
            *word |= 1 << (bit % 32);
        } else {
            *word &= !(1 << (bit % 32));
        }
    }

    /// Lowest free bit in `1..pages`.
    pub(crate) fn first_free(&self, pages: u32) -> Option<u32> {
        let words = pages.div_ceil(32) as usize;
        self.words[..words]
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| {
                #[allow(clippy::cast_possible_truncation)]
                let i = i as u32;
                i * 32 + w.trailing_zeros()
            })
            .filter(|bit| *bit != 0 && *bit < pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_fields_are_independent() {
        let e = RegionEntry::fresh(PhysicalPage::from_number(0x100), 3);
        assert!(e.present());
        assert_eq!(e.base().base(), PhysicalAddress::new(0x0010_0000));
        assert_eq!(e.page_count(), 3);
        assert_eq!(e.free_count(), 2);
        assert_eq!(e.end(), 0x0010_3000);

        let e = e.with_free_count(0);
        assert_eq!(e.page_count(), 3);
        assert_eq!(e.base().number(), 0x100);
        assert_eq!(e.into_bits() & 0xFFF, 1);
    }

    #[test]
    fn region_at_the_top_of_memory() {
        let e = RegionEntry::fresh(PhysicalPage::from_number(0xF_8000), REGION_MAX_PAGES);
        assert_eq!(e.end(), 1 << 32);
        assert!(e.contains(PhysicalAddress::new(0xFFFF_F000)));
        assert!(!e.contains(PhysicalAddress::new(0xF7FF_F000)));
    }

    #[test]
    fn reset_reserves_bit_zero() {
        let mut b = Bitmap { words: [0xAAAA_AAAA; 1024] };
        b.reset(35);
        assert!(!b.is_free(0));
        assert!((1..35).all(|bit| b.is_free(bit)));
        assert!(!b.is_free(35));
        assert_eq!(b.first_free(35), Some(1));
    }

    #[test]
    fn first_free_stays_inside_the_region() {
        let mut b = Bitmap { words: [0; 1024] };
        b.reset(3);
        b.set(1, false);
        b.set(2, false);
        assert_eq!(b.first_free(3), None);

        b.set(2, true);
        assert_eq!(b.first_free(3), Some(2));

        let mut full = Bitmap { words: [0; 1024] };
        full.reset(REGION_MAX_PAGES);
        assert!(full.is_free(REGION_MAX_PAGES - 1));
        for bit in 1..REGION_MAX_PAGES - 1 {
            full.set(bit, false);
        }
        assert_eq!(full.first_free(REGION_MAX_PAGES), Some(REGION_MAX_PAGES - 1));
    }
}
