//! # Virtual Memory Support
//!
//! 32-bit x86 paging for the kernel: the entry codec, page directory and page
//! table objects, the recursive self-map, the temporary mapping window and a
//! small address-space API on top.
//!
//! ## What you get
//! - [`DirectoryEntry`] / [`TableEntry`] with [`DirectoryFlags`] / [`TableFlags`]:
//!   the packed 20-bit frame + 12-bit flag word.
//! - [`PageDirectory`] / [`PageTable`]: 4 KiB-aligned arrays of 1024 entries with
//!   bounds-checked accessors, plus [`DirectoryFrame`] / [`TableFrame`] handles
//!   for frames holding them (create, open, recursive free).
//! - [`TempWindow`]: 25 reference-counted slots to view any physical frame.
//! - [`recursive`]: the self-map in directory slot 1023.
//! - [`AddressSpace`] and [`translate`] for (possibly inactive) directories.
//! - The [`Mmu`] and [`FrameAlloc`] seams. [`X86Mmu`] drives the real CPU;
//!   the `testing` feature adds a simulated one.
//!
//! ## 32-bit Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22     | 21‒12     | 11‒0   |
//! | directory |   table   | offset |
//! ```
//!
//! `CR3` holds the directory frame. Directory entry `va[31:22]` points at a
//! page table, whose entry `va[21:12]` points at the page frame; the offset
//! selects the byte. One directory entry spans 4 MiB, the whole tree 4 GiB.
//!
//! ## Conventions
//!
//! - Directory slot 0 links the kernel's *table 0*. It identity maps the low
//!   4 MiB (boot structures, kernel image) and holds the temporary window and
//!   the bitmap window. Every directory shares the same table 0 frame.
//! - Directory slot 1023 links the *last table*, which makes the active
//!   directory's tables visible at `0xFFC0_0000`.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod address_space;
mod directory;
mod entry;
mod error;
mod mmu;
pub mod recursive;
mod table;
mod temp;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod x86;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::address_space::{AddressSpace, translate};
pub use crate::directory::{DirectoryFrame, PageDirectory};
pub use crate::entry::{
    ADDRESS_MASK, DirectoryEntry, DirectoryFlags, FLAGS_MASK, TableEntry, TableFlags,
};
pub use crate::error::VmemError;
pub use crate::mmu::{FrameAlloc, Mmu};
pub use crate::table::{PageTable, TableFrame};
pub use crate::temp::{TEMP_FLAGS, TempMapping, TempWindow};

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use crate::x86::X86Mmu;

/// Re-export constants as info module.
pub use kernel_info::memory as info;
