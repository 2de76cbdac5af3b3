//! Bare metal entry, global state and the panic handler.

use crate::memory;
use core::panic::PanicInfo;
use kernel_alloc::{RegionTable, RegionTableStorage};
use kernel_info::boot::{BootMemoryRegion, KernelBootInfo};
use kernel_info::memory::{PADDR_RAM_TABLE, PADDR_STACK_TOP, VirtualLayout};
use kernel_memory_addresses::PhysicalAddress;
use kernel_qemu::{QemuLogger, qemu_trace};
use kernel_sync::irq::halt_forever;
use kernel_sync::{SpinLock, SyncOnceCell};
use kernel_vmem::{TempWindow, X86Mmu};
use log::{LevelFilter, error, info};

unsafe extern "C" {
    /// End of the loaded image, `.bss` included. Set by `kernel.ld`.
    static __kernel_end: u8;
}

/// The temporary mapping window, shared by everything that edits page tables.
static TEMP_WINDOW: TempWindow = TempWindow::new(&VirtualLayout::DEFAULT);

/// The physical page allocator, set once paging is on.
static RAM: SyncOnceCell<SpinLock<RegionTable<'static>>> = SyncOnceCell::new();

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    error!("kernel panic: {info}");
    halt_forever()
}

/// The kernel entry point.
///
/// # ABI
/// The boot stub calls this in 32-bit protected mode, paging disabled, with
/// the [`KernelBootInfo`] pointer as the only `cdecl` argument.
///
/// # Naked function & Stack
/// The stub's stack is abandoned; we switch to the fixed boot stack ending at
/// [`PADDR_STACK_TOP`], which the boot directory identity maps, and re-push the
/// argument so [`kernel_entry`] sees a regular call frame.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub extern "C" fn _start_kernel(_boot_info: *const KernelBootInfo) -> ! {
    core::arch::naked_asm!(
        "cli",
        "mov eax, [esp + 4]",
        "mov esp, {stack_top}",
        "xor ebp, ebp",
        "push eax",
        // Fake return address.
        "push 0",
        "jmp {rust_entry}",
        stack_top = const PADDR_STACK_TOP,
        rust_entry = sym kernel_entry,
    );
}

/// Kernel entry running on the boot stack.
#[unsafe(no_mangle)]
extern "C" fn kernel_entry(boot_info: *const KernelBootInfo) -> ! {
    #[cfg(feature = "qemu")]
    qemu_trace!("kernel reporting to QEMU\n");

    // SAFETY: the boot stub passes a valid, identity addressed record.
    let bi = unsafe { &*boot_info };
    kernel_main(bi)
}

fn kernel_main(bi: &KernelBootInfo) -> ! {
    if QemuLogger::new(LevelFilter::Debug).init().is_err() {
        qemu_trace!("logger already installed\n");
    }
    #[allow(clippy::cast_possible_truncation)]
    let linked = (&raw const __kernel_end).addr() as u32;
    let kernel_end = memory::image_end(bi.kernel_end(), PhysicalAddress::new(linked));
    info!(
        "kernel entered, image ends at {kernel_end} (boot stub reports {})",
        bi.kernel_end()
    );

    // SAFETY: the stub hands over `mmap_len` records at `mmap_ptr`. They are
    // only read while paging is still off.
    let map = unsafe {
        core::slice::from_raw_parts(
            bi.mmap_ptr as usize as *const BootMemoryRegion,
            bi.mmap_len as usize,
        )
    };

    let mmu = X86Mmu;
    // SAFETY: the region table page is reserved for exactly this and stays
    // identity mapped.
    let table = unsafe {
        RegionTable::from_raw(
            PADDR_RAM_TABLE as usize as *mut RegionTableStorage,
            VirtualLayout::DEFAULT.ram_bitmasks_base,
        )
    };
    let mut ram = match table {
        Ok(table) => table,
        Err(e) => panic!("region table: {e}"),
    };

    // SAFETY: code, statics and the stack all lie in the identity mapped
    // image and boot structures.
    if let Err(e) = unsafe { memory::init_memory(&mut ram, &mmu, &TEMP_WINDOW, map, kernel_end) } {
        panic!("memory bring-up failed: {e}");
    }

    let Ok(ram) = RAM.set(SpinLock::new(ram)) else {
        panic!("memory initialized twice");
    };

    let free = ram.with_lock_irq(|ram| {
        if let Err(e) = memory::self_check(ram, &mmu, &TEMP_WINDOW) {
            panic!("address space self check failed: {e}");
        }
        ram.free_pages()
    });
    info!("boot complete, {free} pages free; idling");

    halt_forever()
}
