//! # Kernel Physical Memory and Address Space Construction
//!
//! This crate owns physical memory and builds the address spaces on top of
//! the paging primitives in [`kernel_vmem`].
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            Process address spaces (process)         │
//! │    • per-process directory sharing table 0          │
//! │    • user stack and heap, teardown                  │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Boot mapping (kernel_map)              │
//! │    • identity map of the boot structures            │
//! │    • bitmap window, recursive self-map              │
//! │    • enables paging                                 │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │            Region table (ram, memory_map)           │
//! │    • up to 512 regions of up to 128 MiB             │
//! │    • one free/used bitmap page per region           │
//! │    • first-fit page allocation                      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Boot order
//!
//! 1. [`RegionTable::from_raw`] on the fixed region table page.
//! 2. [`add_boot_regions`] with the firmware memory map (paging off).
//! 3. [`build_kernel_map`], which enables paging.
//! 4. [`TempWindow::init`](kernel_vmem::TempWindow::init); from here on
//!    [`RegionFrames`] serves [`ProcessSpace`].
//!
//! Every operation takes the [`Mmu`](kernel_vmem::Mmu) explicitly, so the
//! whole sequence runs on the host against the simulated MMU.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

mod error;
mod frame_alloc;
mod kernel_map;
mod memory_map;
mod process;
mod ram;
mod region;

pub use crate::error::{ErrorKind, RamError};
pub use crate::frame_alloc::RegionFrames;
pub use crate::kernel_map::{BootMapError, BootMapping, build_kernel_map};
pub use crate::memory_map::add_boot_regions;
pub use crate::process::{ProcessError, ProcessSpace};
pub use crate::ram::RegionTable;
pub use crate::region::{
    REGION_MAX_PAGES, REGION_MIN_PAGES, REGION_TABLE_CAPACITY, RegionEntry, RegionInfo,
    RegionTableStorage,
};
