//! # Kernel Entry Point
//!
//! Brings up physical memory and paging, then idles. The freestanding entry
//! lives in [`entry`] and is only built for `i686` bare metal; on the host the
//! binary is an empty `main` so the boot sequence in [`memory`] can be tested
//! against the simulated MMU.

#![cfg_attr(target_os = "none", no_std, no_main)]
#![cfg_attr(not(target_os = "none"), allow(dead_code))]
#![allow(unsafe_code)]

mod memory;
mod tracing;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod entry;

#[cfg(not(target_os = "none"))]
fn main() {}
