//! # Kernel Tracing helpers

use kernel_alloc::RegionTable;
use kernel_info::boot::BootMemoryRegion;
use log::{debug, info};

pub fn log_memory_map(map: &[BootMemoryRegion]) {
    info!("memory map with {} records", map.len());
    for (i, record) in map.iter().enumerate() {
        debug!(
            "  #{i:<2} {:#011x}..{:#011x} {:?}",
            record.base_addr,
            record.end(),
            record.kind()
        );
    }
}

pub fn log_regions(ram: &RegionTable<'_>) {
    for (i, region) in ram.regions().enumerate() {
        debug!("  region {i}: {region}");
    }
    info!(
        "{} regions, {} of {} pages free",
        ram.count(),
        ram.free_pages(),
        ram.max_pages()
    );
}
