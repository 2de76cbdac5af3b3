//! # Kernel Configuration and Boot Interface
//!
//! Fixed memory layout of the 32-bit kernel and the boot stub hand-off types.
//!
//! ## Memory Layout ([`memory`])
//!
//! Everything the kernel needs before and right after enabling paging lives in
//! the first 4 MiB, translated by page table 0 which every page directory
//! shares:
//!
//! ```text
//! Physical == virtual (identity mapped through table 0):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │   null page (never mapped)      │
//! 0x0000_1000 ├─────────────────────────────────┤ PADDR_PAGE_DIR
//!             │   boot page directory           │
//! 0x0000_2000 ├─────────────────────────────────┤ PADDR_RAM_TABLE
//!             │   region table (512 entries)    │
//! 0x0000_3000 ├─────────────────────────────────┤ PADDR_STACK
//!             │   boot stack                    │
//! 0x0009_F000 ├─────────────────────────────────┤ VADDR_TMP_PAGE
//!             │   25 temporary mapping slots    │
//! 0x000B_8000 ├─────────────────────────────────┤ VGA text buffer
//! 0x000B_9000 ├─────────────────────────────────┤ VADDR_RAM_BITMASKS
//!             │   one bitmap page per region    │
//! 0x0010_0000 ├─────────────────────────────────┤ PHYS_LOAD
//!             │   kernel image                  │
//!             └─────────────────────────────────┘
//!
//! Per process:
//!
//! USER_HEAP_BASE  0x4000_0000   heap, grows up
//! USER_STACK_TOP  0xC000_0000   stack, grows down
//! 0xFFC0_0000                   recursive self-map (directory slot 1023)
//! ```
//!
//! The temporary window and the bitmap window are placed by a
//! [`VirtualLayout`](memory::VirtualLayout) value; the defaults match the
//! diagram above.
//!
//! ## Boot Information ([`boot`])
//!
//! The entry stub passes a [`KernelBootInfo`](boot::KernelBootInfo) holding the
//! firmware memory map as [`BootMemoryRegion`](boot::BootMemoryRegion) records and
//! the end of the loaded kernel image.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
