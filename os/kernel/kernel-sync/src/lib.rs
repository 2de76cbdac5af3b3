//! # Kernel synchronization primitives
//!
//! The kernel runs on a single hardware thread, so the only real contender
//! for shared allocator state is an interrupt handler. [`SpinLock::lock_irq`]
//! pairs the lock with an [`IrqGuard`] for exactly that case.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;
mod sync_once_cell;

pub use irq::IrqGuard;
pub use spin_lock::{SpinLock, SpinLockGuard, SpinLockIrqGuard};
pub use sync_once_cell::SyncOnceCell;
