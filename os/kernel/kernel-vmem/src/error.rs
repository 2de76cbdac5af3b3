use kernel_memory_addresses::PhysicalAddress;

/// Failures of the paging structures and the temporary mapping window.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmemError {
    #[error("entry index {0} out of range (0..1024)")]
    IndexOutOfRange(usize),
    #[error("null physical address")]
    NullAddress,
    #[error("address {0} is not page aligned")]
    Unaligned(PhysicalAddress),
    #[error("all temporary mapping slots are in use")]
    WindowFull,
    #[error("{0} is not temporarily mapped")]
    NotMapped(PhysicalAddress),
    #[error("temporary mapping of {0} released more often than acquired")]
    OverRelease(PhysicalAddress),
    #[error("{0} is the active page directory")]
    ActiveDirectory(PhysicalAddress),
    #[error("{0} is a boot-reserved page")]
    BootReserved(PhysicalAddress),
    #[error("paging is not enabled")]
    PagingDisabled,
    #[error("the frame allocator refused to take back {0}")]
    FreeRejected(PhysicalAddress),
    #[error("out of physical memory")]
    OutOfMemory,
}
