//! # Recursive self-map
//!
//! Directory slot 1023 of every directory points at that directory's *last
//! table*. The last table mirrors the directory: whenever slot `i` links a
//! page table, `last[i]` maps the same frame. Slot 1023 of the last table
//! points at the last table itself.
//!
//! With the directory active this makes page table `i` readable and writable
//! at `0xFFC0_0000 + (i << 12)`, and the last table at `0xFFFF_F000`, without
//! a temporary mapping. The trick only ever resolves through the *active*
//! directory; tables of other directories go through the temporary window.
//!
//! ```text
//!   dir[0]    ──► table 0 ◄──────────┐
//!   dir[i]    ──► table i ◄─────┐    │
//!   dir[1023] ──► last ──► last[0]───┘
//!                          last[i]──┘
//!                          last[1023] ──► last
//! ```
//!
//! This is a cycle by construction, so it is kept as explicit bookkeeping
//! here rather than modelled as an owned tree.

use crate::{DirectoryFlags, Mmu, PageDirectory, PageTable, TableFlags, VmemError};
use kernel_info::memory::{VADDR_FIRST_PAGE_TABLE, VADDR_LAST_PAGE_TABLE};
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// Directory slot of the shared kernel table.
pub const KERNEL_TABLE_SLOT: usize = 0;

/// Directory slot of the last table.
pub const SELF_MAP_SLOT: usize = 1023;

/// Flags of the self-map entries: supervisor only.
const SELF_MAP_TABLE_FLAGS: TableFlags = TableFlags::KERNEL;

/// Where page table `dir_index` of the active directory is visible.
#[inline]
#[must_use]
#[allow(clippy::cast_lossless)]
pub const fn active_table(dir_index: u16) -> VirtualAddress {
    VirtualAddress::new(VADDR_FIRST_PAGE_TABLE + (((dir_index & 0x3FF) as u32) << 12))
}

/// Where the active last table sees itself.
#[inline]
#[must_use]
pub const fn active_last_table() -> VirtualAddress {
    VirtualAddress::new(VADDR_LAST_PAGE_TABLE)
}

/// Page table `dir_index` of the active directory.
///
/// # Safety
/// Paging must be enabled, slot `dir_index` of the active directory must be
/// present, and no other reference to that table may be live.
pub unsafe fn active_table_mut<'a, M: Mmu>(mmu: &M, dir_index: u16) -> &'a mut PageTable {
    unsafe { mmu.deref_virtual(active_table(dir_index)) }
}

/// Link the shared `table0` into slot 0 of `dir` and install `last` as its
/// recursive table.
///
/// # Errors
/// None in practice; the indices are constants.
pub fn install_self_map(
    dir: &mut PageDirectory,
    last: &mut PageTable,
    last_page: PhysicalPage<Size4K>,
    table0: PhysicalPage<Size4K>,
) -> Result<(), VmemError> {
    dir.set(KERNEL_TABLE_SLOT, table0.base(), DirectoryFlags::KERNEL)?;
    dir.set(SELF_MAP_SLOT, last_page.base(), DirectoryFlags::KERNEL)?;
    last.set(SELF_MAP_SLOT, last_page.base(), SELF_MAP_TABLE_FLAGS)?;
    last.set(KERNEL_TABLE_SLOT, table0.base(), SELF_MAP_TABLE_FLAGS)
}

/// Point directory slot `i` at `table` and mirror it into the last table.
///
/// # Errors
/// [`VmemError::IndexOutOfRange`] for `i >= 1023`; the self-map slot is not
/// available for ordinary tables.
pub fn link_table(
    dir: &mut PageDirectory,
    last: &mut PageTable,
    i: usize,
    table: PhysicalPage<Size4K>,
    flags: DirectoryFlags,
) -> Result<(), VmemError> {
    if i >= SELF_MAP_SLOT {
        return Err(VmemError::IndexOutOfRange(i));
    }
    dir.set(i, table.base(), flags)?;
    last.set(i, table.base(), SELF_MAP_TABLE_FLAGS)
}

/// Undo [`link_table`].
///
/// # Errors
/// [`VmemError::IndexOutOfRange`] for `i >= 1023`.
pub fn unlink_table(
    dir: &mut PageDirectory,
    last: &mut PageTable,
    i: usize,
) -> Result<(), VmemError> {
    if i >= SELF_MAP_SLOT {
        return Err(VmemError::IndexOutOfRange(i));
    }
    dir.clear_entry(i)?;
    last.clear_entry(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_map_addresses() {
        assert_eq!(active_table(0).as_u32(), 0xFFC0_0000);
        assert_eq!(active_table(767).as_u32(), 0xFFEF_F000);
        assert_eq!(active_table(1023), active_last_table());
    }

    #[test]
    fn link_mirrors_into_last_table() {
        let mut dir = PageDirectory::zeroed();
        let mut last = PageTable::zeroed();
        let last_page = PhysicalPage::from_number(0x40);
        let table0 = PhysicalPage::from_number(0x41);
        let table5 = PhysicalPage::from_number(0x42);

        install_self_map(&mut dir, &mut last, last_page, table0).unwrap();
        link_table(&mut dir, &mut last, 5, table5, DirectoryFlags::USER).unwrap();

        assert_eq!(dir.addr(SELF_MAP_SLOT), last_page.base());
        assert_eq!(last.addr(SELF_MAP_SLOT), last_page.base());
        assert_eq!(last.addr(0), table0.base());
        assert_eq!(dir.addr(0), table0.base());
        assert_eq!(dir.addr(5), table5.base());
        assert_eq!(last.addr(5), table5.base());
        assert!(!last.flags(5).contains(TableFlags::USER_SUPERVISOR));

        assert_eq!(
            link_table(&mut dir, &mut last, SELF_MAP_SLOT, table5, DirectoryFlags::USER),
            Err(VmemError::IndexOutOfRange(SELF_MAP_SLOT))
        );

        unlink_table(&mut dir, &mut last, 5).unwrap();
        assert!(dir.entry(5).is_some_and(|e| !e.is_present()));
        assert!(!last.flags(5).contains(TableFlags::PRESENT));
    }
}
