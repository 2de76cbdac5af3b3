mod common;

use common::{KERNEL_END, boot, memory_map, region_table};
use kernel_alloc::{
    BootMapError, RamError, RegionFrames, RegionTableStorage, add_boot_regions, build_kernel_map,
};
use kernel_info::boot::{BootMemoryRegion, MemoryRegionKind};
use kernel_info::memory::{LayoutError, VirtualLayout};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::testing::SimulatedMmu;
use kernel_vmem::{FrameAlloc, Mmu, TempWindow, VmemError};

fn pa(v: u32) -> PhysicalAddress {
    PhysicalAddress::new(v)
}

fn va(v: u32) -> VirtualAddress {
    VirtualAddress::new(v)
}

fn page(v: u32) -> PhysicalPage<Size4K> {
    PhysicalPage::from_addr(pa(v))
}

fn window() -> TempWindow {
    TempWindow::new(&VirtualLayout::DEFAULT)
}

#[test]
fn memory_map_is_clipped_to_usable_ram() {
    let mmu = SimulatedMmu::new();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = region_table(&mut storage);

    assert_eq!(
        add_boot_regions(&mut ram, &mmu, &memory_map(), pa(KERNEL_END)),
        Ok(2)
    );
    let regions: Vec<(u32, u32)> = ram
        .regions()
        .map(|r| (r.base.base().as_u32(), r.page_count))
        .collect();
    assert_eq!(
        regions,
        vec![(KERNEL_END, (0x200_0000 - KERNEL_END) / 0x1000), (0x300_0000, 0x100)]
    );
}

#[test]
fn memory_map_without_ram() {
    let mmu = SimulatedMmu::new();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = region_table(&mut storage);
    let map = [
        BootMemoryRegion::new(0, 0x9_F000, MemoryRegionKind::Usable),
        BootMemoryRegion::new(0x10_0000, 0x100_0000, MemoryRegionKind::Reserved),
        BootMemoryRegion::new(0x2_0000_0000, 0x100_0000, MemoryRegionKind::Usable),
    ];

    let err = add_boot_regions(&mut ram, &mmu, &map, pa(KERNEL_END)).unwrap_err();
    assert_eq!(err, RamError::NoUsableMemory);
    assert_eq!(ram.count(), 0);
}

#[test]
fn records_at_the_top_of_the_address_space() {
    let mmu = SimulatedMmu::new();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = region_table(&mut storage);
    let map = [
        BootMemoryRegion::new(u64::MAX - 0x10, 0x10, MemoryRegionKind::Usable),
        BootMemoryRegion::new(0xFFFF_FFFF_FFFF_F001, u64::MAX, MemoryRegionKind::Usable),
        BootMemoryRegion::new(0x100_0000, 0x10_0000, MemoryRegionKind::Usable),
    ];

    assert_eq!(add_boot_regions(&mut ram, &mmu, &map, pa(KERNEL_END)), Ok(1));
    assert_eq!(ram.count(), 1);
}

#[test]
fn boot_structures_are_identity_mapped() {
    let mmu = SimulatedMmu::new();
    let window = window();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let _ram = boot(&mmu, &window, &mut storage);

    assert!(mmu.paging_enabled());
    assert_eq!(mmu.active_directory(), Some(page(0x1000)));

    assert_eq!(mmu.walk(va(0)), None);
    for addr in [0x1000, 0x2000, 0x3000, 0x6FFC, 0x10_0000, 0x17_FFFC] {
        assert_eq!(mmu.walk(va(addr)), Some(pa(addr)), "{addr:#x}");
    }
    assert_eq!(mmu.walk(va(0x7000)), None);
    assert_eq!(mmu.walk(va(KERNEL_END)), None);
}

#[test]
fn windows_and_self_map_after_boot() {
    let mmu = SimulatedMmu::new();
    let window = window();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let _ram = boot(&mmu, &window, &mut storage);

    // Bitmap window, one slot per region.
    assert_eq!(mmu.walk(va(0xB_9000)), Some(pa(KERNEL_END)));
    assert_eq!(mmu.walk(va(0xB_A000)), Some(pa(0x300_0000)));
    assert_eq!(mmu.walk(va(0xB_B000)), None);

    // Temporary window starts empty.
    assert_eq!(mmu.walk(va(0x9_F000)), None);
    assert_eq!(window.available(), 25);

    // Table 0 and the last table came from the first region.
    assert_eq!(mmu.walk(va(0xFFC0_0000)), Some(pa(0x18_1000)));
    assert_eq!(mmu.walk(va(0xFFFF_F000)), Some(pa(0x18_2000)));
}

#[test]
fn boot_mapping_report() {
    let mmu = SimulatedMmu::new();
    let window = window();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = region_table(&mut storage);
    add_boot_regions(&mut ram, &mmu, &memory_map(), pa(KERNEL_END)).unwrap();
    let free_before = ram.free_pages();

    // SAFETY: simulated hardware.
    let mapping = unsafe {
        build_kernel_map(&mut ram, &mmu, &window, &VirtualLayout::DEFAULT, pa(KERNEL_END))
    }
    .unwrap();

    assert_eq!(mapping.directory, page(0x1000));
    assert_eq!(mapping.table0, page(0x18_1000));
    assert_eq!(mapping.last_table, page(0x18_2000));
    // Directory, region table, four stack pages, 512 KiB of kernel.
    assert_eq!(mapping.identity_pages, 1 + 1 + 4 + 128);
    assert_eq!(mapping.bitmap_slots, 2);
    assert_eq!(ram.free_pages(), free_before - 2);
}

#[test]
fn allocation_and_window_after_boot() {
    let mmu = SimulatedMmu::new();
    let window = window();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = boot(&mmu, &window, &mut storage);

    assert_eq!(ram.page_palloc(&mmu), Err(RamError::PagingEnabled));
    let p = ram.page_alloc(&mmu).unwrap();
    assert_eq!(p, page(0x18_3000));

    let slot = window.map(&mmu, p.base()).unwrap();
    assert_eq!(slot, va(0x9_F000));
    assert_eq!(mmu.walk(slot), Some(p.base()));
    window.unmap(&mmu, p.base()).unwrap();
    assert_eq!(mmu.walk(slot), None);

    ram.page_free(&mmu, p.base()).unwrap();
    assert_eq!(ram.page_alloc(&mmu), Ok(p));
}

#[test]
fn second_boot_mapping_is_refused() {
    let mmu = SimulatedMmu::new();
    let window = window();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = boot(&mmu, &window, &mut storage);

    // SAFETY: rejected before anything is touched.
    let err = unsafe {
        build_kernel_map(&mut ram, &mmu, &window, &VirtualLayout::DEFAULT, pa(KERNEL_END))
    }
    .unwrap_err();
    assert_eq!(err, BootMapError::Ram(RamError::PagingEnabled));
}

#[test]
fn oversized_kernel() {
    let mmu = SimulatedMmu::new();
    let window = window();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = region_table(&mut storage);
    ram.add_memory(&mmu, pa(0x100_0000), 0x10_0000).unwrap();

    // SAFETY: simulated hardware.
    let err = unsafe {
        build_kernel_map(&mut ram, &mmu, &window, &VirtualLayout::DEFAULT, pa(0x50_0000))
    }
    .unwrap_err();
    assert_eq!(err, BootMapError::KernelTooLarge(pa(0x50_0000)));
    assert!(!mmu.paging_enabled());
}

#[test]
fn broken_layout() {
    let mmu = SimulatedMmu::new();
    let layout = VirtualLayout {
        tmp_page_base: va(0x9_F000),
        ram_bitmasks_base: va(0xA_0000),
    };
    let window = TempWindow::new(&layout);
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = region_table(&mut storage);
    ram.add_memory(&mmu, pa(0x100_0000), 0x10_0000).unwrap();

    // SAFETY: simulated hardware.
    let err = unsafe { build_kernel_map(&mut ram, &mmu, &window, &layout, pa(KERNEL_END)) }
        .unwrap_err();
    assert_eq!(err, BootMapError::Layout(LayoutError::Overlap));
}

#[test]
fn bitmap_window_running_into_the_kernel() {
    let mmu = SimulatedMmu::new();
    let window = window();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = region_table(&mut storage);
    // Slot 71 of the bitmap window is 0x10_0000, the kernel load address.
    for i in 0..72 {
        ram.add_memory(&mmu, pa(0x100_0000 + i * 0x2000), 0x2000)
            .unwrap();
    }
    let free = ram.free_pages();

    // SAFETY: simulated hardware.
    let err = unsafe {
        build_kernel_map(&mut ram, &mmu, &window, &VirtualLayout::DEFAULT, pa(KERNEL_END))
    }
    .unwrap_err();
    assert_eq!(err, BootMapError::Collision(va(0x10_0000)));
    assert!(!mmu.paging_enabled());
    // Table 0 went back.
    assert_eq!(ram.free_pages(), free);
}

#[test]
fn no_page_for_the_last_table() {
    let mmu = SimulatedMmu::new();
    let window = window();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = region_table(&mut storage);
    ram.add_memory(&mmu, pa(0x100_0000), 0x2000).unwrap();

    // SAFETY: simulated hardware.
    let err = unsafe {
        build_kernel_map(&mut ram, &mmu, &window, &VirtualLayout::DEFAULT, pa(KERNEL_END))
    }
    .unwrap_err();
    assert_eq!(err, BootMapError::Ram(RamError::OutOfMemory));
    assert!(!mmu.paging_enabled());
    assert_eq!(ram.free_pages(), 1);
    assert_eq!(ram.page_palloc(&mmu), Ok(page(0x100_1000)));
}

#[test]
fn region_table_for_another_bitmap_window() {
    let mmu = SimulatedMmu::new();
    let window = window();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = region_table(&mut storage);
    ram.add_memory(&mmu, pa(0x100_0000), 0x10_0000).unwrap();
    let free = ram.free_pages();
    let layout = VirtualLayout {
        tmp_page_base: VirtualLayout::DEFAULT.tmp_page_base,
        ram_bitmasks_base: va(0xC_0000),
    };

    // SAFETY: rejected before anything is touched.
    let err = unsafe { build_kernel_map(&mut ram, &mmu, &window, &layout, pa(KERNEL_END)) }
        .unwrap_err();
    assert_eq!(
        err,
        BootMapError::BitmapWindowMismatch {
            expected: va(0xC_0000),
            found: va(0xB_9000),
        }
    );
    assert!(!mmu.paging_enabled());
    assert_eq!(ram.free_pages(), free);
    assert_eq!(mmu.touched_frames(), 1);
}

#[test]
fn temporary_window_for_another_layout() {
    let mmu = SimulatedMmu::new();
    let window = TempWindow::new(&VirtualLayout {
        tmp_page_base: va(0x5_0000),
        ram_bitmasks_base: VirtualLayout::DEFAULT.ram_bitmasks_base,
    });
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = region_table(&mut storage);
    ram.add_memory(&mmu, pa(0x100_0000), 0x10_0000).unwrap();

    // SAFETY: rejected before anything is touched.
    let err = unsafe {
        build_kernel_map(&mut ram, &mmu, &window, &VirtualLayout::DEFAULT, pa(KERNEL_END))
    }
    .unwrap_err();
    assert_eq!(
        err,
        BootMapError::TempWindowMismatch {
            expected: va(0x9_F000),
            found: va(0x5_0000),
        }
    );
    assert!(!mmu.paging_enabled());
}

#[test]
fn later_regions_are_reached_through_their_window_slot() {
    let mmu = SimulatedMmu::new();
    let window = window();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = region_table(&mut storage);
    // Region 0 has three pages: table 0, the last table and one spare.
    ram.add_memory(&mmu, pa(0x20_0000), 0x4000).unwrap();
    ram.add_memory(&mmu, pa(0x40_0000), 0x1_0000).unwrap();
    // SAFETY: simulated hardware.
    unsafe { build_kernel_map(&mut ram, &mmu, &window, &VirtualLayout::DEFAULT, pa(KERNEL_END)) }
        .unwrap();
    window.init();
    assert_eq!(mmu.walk(va(0xB_A000)), Some(pa(0x40_0000)));

    assert_eq!(ram.page_alloc(&mmu), Ok(page(0x20_3000)));
    assert_eq!(ram.page_alloc(&mmu), Ok(page(0x40_1000)));
    // Region 1's bitmap: pages 1..16 free, page 1 now taken.
    assert_eq!(mmu.read_u32(pa(0x40_0000)), 0xFFFC);
    assert_eq!(ram.free_pages(), 14);

    ram.page_free(&mmu, pa(0x40_1000)).unwrap();
    assert_eq!(mmu.read_u32(pa(0x40_0000)), 0xFFFE);
    assert_eq!(
        ram.page_free(&mmu, pa(0x40_1000)),
        Err(RamError::DoubleFree(pa(0x40_1000)))
    );
    assert_eq!(ram.page_alloc(&mmu), Ok(page(0x40_1000)));
}

#[test]
fn region_frames_follow_the_paging_state() {
    let mmu = SimulatedMmu::new();
    let window = window();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = boot(&mmu, &window, &mut storage);
    let free = ram.free_pages();

    let mut frames = RegionFrames::new(&mut ram, &mmu);
    let p = frames.alloc_4k().unwrap();
    assert_eq!(p, page(0x18_3000));
    assert_eq!(frames.table().free_pages(), free - 1);

    let unowned = page(0x100_0000);
    assert_eq!(
        frames.free_4k(unowned),
        Err(VmemError::FreeRejected(unowned.base()))
    );
    assert_eq!(frames.free_4k(p), Ok(()));
    assert_eq!(
        frames.free_4k(p),
        Err(VmemError::FreeRejected(p.base()))
    );
    assert_eq!(frames.table().free_pages(), free);
}

#[test]
fn region_frames_before_paging() {
    let mmu = SimulatedMmu::new();
    let mut storage = Box::new(RegionTableStorage::zeroed());
    let mut ram = region_table(&mut storage);
    ram.add_memory(&mmu, pa(0x100_0000), 0x3000).unwrap();

    let mut frames = RegionFrames::new(&mut ram, &mmu);
    assert_eq!(frames.alloc_4k(), Some(page(0x100_1000)));
    assert_eq!(frames.alloc_4k(), Some(page(0x100_2000)));
    assert_eq!(frames.alloc_4k(), None);
}
