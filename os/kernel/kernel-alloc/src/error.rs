use kernel_memory_addresses::PhysicalAddress;

/// Coarse classification of [`RamError`]s.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Null, misaligned or too small input. The call was simply rejected.
    InvalidArgument,
    /// The region table or physical memory ran out.
    CapacityExceeded,
    /// Called with paging in the wrong state.
    PreconditionViolated,
    /// The page was already free.
    DoubleFree,
    /// No region owns the address.
    NotFound,
}

/// Failures of the region table allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RamError {
    #[error("region table storage is null")]
    NullTable,
    #[error("bitmap window is null")]
    NullBitmapWindow,
    #[error("operation requires paging to be disabled")]
    PagingEnabled,
    #[error("operation requires paging to be enabled")]
    PagingDisabled,
    #[error("memory extent starts at address zero")]
    ZeroBase,
    #[error("address {0} is not page aligned")]
    Unaligned(PhysicalAddress),
    #[error("extent of {0:#x} bytes is smaller than two pages")]
    TooSmall(u32),
    #[error("extent at {0} overlaps a registered region")]
    Overlap(PhysicalAddress),
    #[error("region table is full")]
    TableFull,
    #[error("{0} is not an allocatable page of any region")]
    NotOwned(PhysicalAddress),
    #[error("page {0} is already free")]
    DoubleFree(PhysicalAddress),
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("the boot memory map holds no usable memory")]
    NoUsableMemory,
}

impl RamError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NullTable
            | Self::NullBitmapWindow
            | Self::ZeroBase
            | Self::Unaligned(_)
            | Self::TooSmall(_)
            | Self::Overlap(_) => ErrorKind::InvalidArgument,
            Self::TableFull | Self::OutOfMemory => ErrorKind::CapacityExceeded,
            Self::PagingEnabled | Self::PagingDisabled => ErrorKind::PreconditionViolated,
            Self::DoubleFree(_) => ErrorKind::DoubleFree,
            Self::NotOwned(_) | Self::NoUsableMemory => ErrorKind::NotFound,
        }
    }
}
