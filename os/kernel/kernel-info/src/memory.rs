//! # Memory Layout
//!
//! Physical placement of the boot structures and the fixed virtual windows of
//! the 32-bit kernel. Other subsystems (the kernel heap in particular) link
//! against these values, so they only change together with their users.

use kernel_memory_addresses::{PageSize, Size4K, Size4M, VirtualAddress};

/// Page granularity in bytes.
pub const PAGE_SIZE: u32 = Size4K::SIZE;

/// Number of entries in a page directory or a page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Physical address of the boot page directory.
pub const PADDR_PAGE_DIR: u32 = 0x1000;

/// Physical address of the region table (one page, 512 entries).
pub const PADDR_RAM_TABLE: u32 = 0x2000;

/// Physical address of the lowest boot stack page.
pub const PADDR_STACK: u32 = 0x3000;

/// Number of pages of the boot stack, growing down from [`PADDR_STACK_TOP`].
pub const BOOT_STACK_PAGES: u32 = 4;

/// One past the highest boot stack byte.
pub const PADDR_STACK_TOP: u32 = PADDR_STACK + BOOT_STACK_PAGES * PAGE_SIZE;

/// Where the boot loader places the kernel image (LMA == VMA, identity mapped).
pub const PHYS_LOAD: u32 = 0x0010_0000; // 1 MiB

/// VGA text buffer. The temporary window ends exactly here.
pub const VGA_TEXT_BUFFER: u32 = 0x000B_8000;

/// Number of temporary mapping slots.
pub const VADDR_TMP_PAGE_COUNT: usize = 25;

/// Default base of the temporary mapping window.
#[allow(clippy::cast_possible_truncation)]
pub const VADDR_TMP_PAGE: u32 = VGA_TEXT_BUFFER - VADDR_TMP_PAGE_COUNT as u32 * PAGE_SIZE;

/// Default base of the per-region bitmap window.
pub const VADDR_RAM_BITMASKS: u32 = VGA_TEXT_BUFFER + PAGE_SIZE;

/// The recursive self-map: page table `i` of the active directory lives at
/// `VADDR_FIRST_PAGE_TABLE + i * PAGE_SIZE`.
pub const VADDR_FIRST_PAGE_TABLE: u32 = 0xFFC0_0000;

/// The last page table's view of itself.
pub const VADDR_LAST_PAGE_TABLE: u32 = 0xFFFF_F000;

/// Everything below this address is translated by the shared kernel table 0.
pub const KERNEL_TABLE_END: u32 = Size4M::SIZE;

/// Start of a process heap; grows upwards.
pub const USER_HEAP_BASE: u32 = 0x4000_0000;

/// One past the top of a process stack; grows downwards.
pub const USER_STACK_TOP: u32 = 0xC000_0000;

/// Upper bound for a process stack.
pub const USER_STACK_MAX_PAGES: u32 = 256;

/// Pages at fixed boot addresses (null page, boot directory, region table,
/// boot stack). They never came from the page allocator and never go back to it.
#[inline]
#[must_use]
pub const fn is_boot_reserved(pa: u32) -> bool {
    pa < PADDR_STACK_TOP
}

#[allow(clippy::cast_possible_truncation)]
const _: () = {
    assert!(VADDR_TMP_PAGE == 0x9F000);
    assert!(VADDR_TMP_PAGE + VADDR_TMP_PAGE_COUNT as u32 * PAGE_SIZE == VGA_TEXT_BUFFER);
    assert!(PADDR_STACK_TOP <= VADDR_TMP_PAGE);
    assert!(PADDR_PAGE_DIR < PADDR_RAM_TABLE && PADDR_RAM_TABLE < PADDR_STACK);
    assert!(PHYS_LOAD.is_multiple_of(PAGE_SIZE));
    assert!(USER_HEAP_BASE >= KERNEL_TABLE_END);
    assert!(USER_HEAP_BASE < USER_STACK_TOP - USER_STACK_MAX_PAGES * PAGE_SIZE);
    assert!(USER_STACK_TOP < VADDR_FIRST_PAGE_TABLE);
};

/// Placement of the two configurable windows inside table 0.
///
/// Source revisions of the kernel disagree on where the bitmap window lives,
/// so it is carried as a value instead of a constant.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VirtualLayout {
    /// Base of the [`VADDR_TMP_PAGE_COUNT`] temporary mapping slots.
    pub tmp_page_base: VirtualAddress,
    /// Base of the bitmap window, one page per registered region.
    pub ram_bitmasks_base: VirtualAddress,
}

/// Reasons a [`VirtualLayout`] is unusable.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("window base {0} is not page aligned")]
    Unaligned(VirtualAddress),
    #[error("window base {0} is the null page")]
    NullPage(VirtualAddress),
    #[error("window at {0} leaves the kernel table")]
    OutsideKernelTable(VirtualAddress),
    #[error("temporary window and bitmap window overlap")]
    Overlap,
}

impl VirtualLayout {
    pub const DEFAULT: Self = Self {
        tmp_page_base: VirtualAddress::new(VADDR_TMP_PAGE),
        ram_bitmasks_base: VirtualAddress::new(VADDR_RAM_BITMASKS),
    };

    /// Virtual address of temporary slot `slot`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn tmp_slot(&self, slot: usize) -> VirtualAddress {
        VirtualAddress::new(self.tmp_page_base.as_u32() + slot as u32 * PAGE_SIZE)
    }

    /// Virtual address of the bitmap page of region `region`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn bitmask_slot(&self, region: usize) -> VirtualAddress {
        VirtualAddress::new(self.ram_bitmasks_base.as_u32() + region as u32 * PAGE_SIZE)
    }

    /// One past the end of the temporary window.
    #[inline]
    #[must_use]
    pub const fn tmp_end(&self) -> VirtualAddress {
        self.tmp_slot(VADDR_TMP_PAGE_COUNT)
    }

    /// Checks alignment, placement inside table 0 and that the windows do not
    /// overlap, assuming at least one region.
    ///
    /// # Errors
    /// The first violated constraint.
    pub const fn validate(&self) -> Result<(), LayoutError> {
        let tmp = self.tmp_page_base;
        let bm = self.ram_bitmasks_base;

        if !tmp.is_aligned::<Size4K>() {
            return Err(LayoutError::Unaligned(tmp));
        }
        if !bm.is_aligned::<Size4K>() {
            return Err(LayoutError::Unaligned(bm));
        }
        if tmp.is_null() {
            return Err(LayoutError::NullPage(tmp));
        }
        if bm.is_null() {
            return Err(LayoutError::NullPage(bm));
        }
        if self.tmp_end().as_u32() > KERNEL_TABLE_END || tmp.as_u32() >= KERNEL_TABLE_END {
            return Err(LayoutError::OutsideKernelTable(tmp));
        }
        if bm.as_u32() >= KERNEL_TABLE_END {
            return Err(LayoutError::OutsideKernelTable(bm));
        }
        if bm.as_u32() >= tmp.as_u32() && bm.as_u32() < self.tmp_end().as_u32() {
            return Err(LayoutError::Overlap);
        }
        if tmp.as_u32() >= bm.as_u32() && tmp.as_u32() < bm.as_u32() + PAGE_SIZE {
            return Err(LayoutError::Overlap);
        }
        Ok(())
    }
}

impl Default for VirtualLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_valid() {
        assert_eq!(VirtualLayout::DEFAULT.validate(), Ok(()));
        assert_eq!(VirtualLayout::DEFAULT.tmp_slot(0).as_u32(), 0x9F000);
        assert_eq!(VirtualLayout::DEFAULT.tmp_end().as_u32(), VGA_TEXT_BUFFER);
        assert_eq!(VirtualLayout::DEFAULT.bitmask_slot(2).as_u32(), 0xBB000);
    }

    #[test]
    fn boot_pages_are_reserved() {
        assert!(is_boot_reserved(PADDR_PAGE_DIR));
        assert!(is_boot_reserved(PADDR_RAM_TABLE));
        assert!(is_boot_reserved(PADDR_STACK_TOP - PAGE_SIZE));
        assert!(!is_boot_reserved(PADDR_STACK_TOP));
        assert!(!is_boot_reserved(PHYS_LOAD));
    }

    #[test]
    fn rejects_broken_layouts() {
        let unaligned = VirtualLayout {
            tmp_page_base: VirtualAddress::new(0x9F001),
            ..VirtualLayout::DEFAULT
        };
        assert_eq!(
            unaligned.validate(),
            Err(LayoutError::Unaligned(VirtualAddress::new(0x9F001)))
        );

        let overlapping = VirtualLayout {
            tmp_page_base: VirtualAddress::new(0x9F000),
            ram_bitmasks_base: VirtualAddress::new(0xA0000),
        };
        assert_eq!(overlapping.validate(), Err(LayoutError::Overlap));

        let outside = VirtualLayout {
            ram_bitmasks_base: VirtualAddress::new(0x0040_0000),
            ..VirtualLayout::DEFAULT
        };
        assert!(matches!(
            outside.validate(),
            Err(LayoutError::OutsideKernelTable(_))
        ));

        let null = VirtualLayout {
            ram_bitmasks_base: VirtualAddress::zero(),
            ..VirtualLayout::DEFAULT
        };
        assert!(matches!(null.validate(), Err(LayoutError::NullPage(_))));
    }
}
