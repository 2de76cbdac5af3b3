#![allow(dead_code)]

use kernel_alloc::{RegionTable, RegionTableStorage, add_boot_regions, build_kernel_map};
use kernel_info::boot::{BootMemoryRegion, MemoryRegionKind};
use kernel_info::memory::VirtualLayout;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::TempWindow;
use kernel_vmem::testing::SimulatedMmu;

/// Kernel image ends here in every boot test.
pub const KERNEL_END: u32 = 0x0018_0000;

/// A small PC: low memory, a hole, 32 MiB of RAM and an ACPI reclaimable
/// block.
pub fn memory_map() -> Vec<BootMemoryRegion> {
    vec![
        BootMemoryRegion::new(0, 0x9_F000, MemoryRegionKind::Usable),
        BootMemoryRegion::new(0xF_0000, 0x1_0000, MemoryRegionKind::Reserved),
        BootMemoryRegion::new(0x10_0000, 0x1F0_0000, MemoryRegionKind::Usable),
        BootMemoryRegion::new(0x300_0000, 0x10_0000, MemoryRegionKind::AcpiReclaimable),
        BootMemoryRegion::new(0x400_0000, 0x10_0000, MemoryRegionKind::BadMemory),
        BootMemoryRegion::new(0x1_0000_0000, 0x1000_0000, MemoryRegionKind::Usable),
    ]
}

pub fn region_table(storage: &mut RegionTableStorage) -> RegionTable<'_> {
    RegionTable::new(storage, VirtualLayout::DEFAULT.ram_bitmasks_base).unwrap()
}

/// Region table loaded from [`memory_map`], boot mapping built, window ready.
pub fn boot<'s>(
    mmu: &SimulatedMmu,
    window: &TempWindow,
    storage: &'s mut RegionTableStorage,
) -> RegionTable<'s> {
    let mut ram = region_table(storage);
    let kernel_end = PhysicalAddress::new(KERNEL_END);
    add_boot_regions(&mut ram, mmu, &memory_map(), kernel_end).unwrap();
    // SAFETY: simulated hardware.
    unsafe { build_kernel_map(&mut ram, mmu, window, &VirtualLayout::DEFAULT, kernel_end) }
        .unwrap();
    window.init();
    ram
}
