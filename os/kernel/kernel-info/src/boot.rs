//! # Kernel Boot Information

use kernel_memory_addresses::PhysicalAddress;

/// Kernel function pointer.
///
/// # ABI
/// Called from the 32-bit protected mode entry stub with paging disabled.
pub type KernelEntryFn = extern "C" fn(*const KernelBootInfo) -> !;

/// Information the kernel needs from the boot stub.
/// Keep this `#[repr(C)]` and prefer fixed-size integers at the ABI boundary.
#[repr(C)]
#[derive(Clone)]
pub struct KernelBootInfo {
    /// Physical address of an array of [`BootMemoryRegion`] records.
    pub mmap_ptr: u32,

    /// Number of records (not bytes) behind [`mmap_ptr`](Self::mmap_ptr).
    pub mmap_len: u32,

    /// One past the last byte of the loaded kernel image (physical).
    pub kernel_end: u32,
}

impl KernelBootInfo {
    #[inline]
    #[must_use]
    pub const fn kernel_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.kernel_end)
    }
}

/// One entry of the firmware memory map, in discovery order.
///
/// Addresses and lengths are 64-bit as reported by the firmware; everything
/// above 4 GiB is clipped away on ingestion.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootMemoryRegion {
    pub base_addr: u64,
    pub length: u64,
    pub kind: u32,
}

impl BootMemoryRegion {
    #[inline]
    #[must_use]
    pub const fn new(base_addr: u64, length: u64, kind: MemoryRegionKind) -> Self {
        Self {
            base_addr,
            length,
            kind: kind.as_raw(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> MemoryRegionKind {
        MemoryRegionKind::from_raw(self.kind)
    }

    /// One past the last byte, saturating at `u64::MAX`.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base_addr.saturating_add(self.length)
    }
}

/// Memory map record types.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemoryRegionKind {
    /// Type 1: free RAM.
    Usable,
    /// Type 2: reserved by firmware or hardware.
    Reserved,
    /// Type 3: ACPI tables; reclaimable once parsed.
    AcpiReclaimable,
    /// Type 4: ACPI non-volatile storage.
    AcpiNvs,
    /// Type 5: defective RAM.
    BadMemory,
    /// Anything else.
    Other(u32),
}

impl MemoryRegionKind {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Usable,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Usable => 1,
            Self::Reserved => 2,
            Self::AcpiReclaimable => 3,
            Self::AcpiNvs => 4,
            Self::BadMemory => 5,
            Self::Other(other) => other,
        }
    }

    /// Whether the page allocator may hand out memory of this kind.
    #[inline]
    #[must_use]
    pub const fn is_allocatable(self) -> bool {
        matches!(self, Self::Usable | Self::AcpiReclaimable)
    }
}
