#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
#![feature(alloc_error_handler)]
#![allow(dead_code, static_mut_refs)]

extern crate alloc;

mod arch;
mod boot_info;
mod drivers;
mod fs;
mod ipc;
mod memory;
mod panic;
mod sync;
mod syscall;
mod task;

use boot_info::BootInfo;

#[no_mangle]
pub extern "C" fn kernel_main(boot_info_addr: u32) -> ! {
    // Phase 1: early output — serial only, boot is silent on the VGA console
    // until something actually needs to show the user text.
    drivers::serial::init();
    serial_println!("");
    serial_println!("==============================");
    serial_println!("  flopkernel");
    serial_println!("==============================");

    drivers::vga_text::init();

    let boot_info = unsafe { &*(boot_info_addr as *const BootInfo) };
    if !boot_info.validate() {
        let magic = unsafe { core::ptr::addr_of!((*boot_info).magic).read_unaligned() };
        serial_println!("WARNING: BootInfo magic mismatch (got {:#010x})", magic);
    } else {
        serial_println!("BootInfo validated (magic OK)");
    }

    let kstart = unsafe { core::ptr::addr_of!((*boot_info).kernel_phys_start).read_unaligned() };
    let kend = unsafe { core::ptr::addr_of!((*boot_info).kernel_phys_end).read_unaligned() };
    serial_println!("Kernel loaded at {:#010x} - {:#010x}", kstart, kend);

    // Phase 2: CPU setup
    arch::x86::gdt::init();
    serial_println!("[OK] GDT initialized");

    arch::x86::idt::init();
    arch::x86::tss::init();

    arch::x86::pic::init();
    serial_println!("[OK] PIC remapped (IRQ 0-15 -> INT 32-47)");

    arch::x86::pit::init(100);
    serial_println!("[OK] PIT configured at 100 Hz");

    // Phase 3: memory — early allocator first (needed by anything that must
    // allocate before the buddy PMM and heap exist), then PMM, VMM, heap.
    // Neither `physical::init` nor `virtual_mem::init` touch the global
    // allocator (their backing storage is static), so this order is safe
    // even though `heap::init` is what flips the heap live.
    memory::early::init(boot_info);
    memory::physical::init(boot_info);
    memory::virtual_mem::init(boot_info);
    memory::heap::init();

    // Retire the bootstrap pool now that nothing will request an early
    // allocation again, and fold its frames back into the PMM.
    let (early_base, early_frames) = memory::early::early_destroy();
    if early_frames > 0 {
        memory::physical::absorb_region(memory::address::PhysAddr::new(early_base as u32), early_frames);
        serial_println!("early: retired bootstrap pool, {} frames returned to PMM", early_frames);
    }

    // Phase 4: ACPI discovery (requires the heap for Vec). Finding nothing
    // just means poweroff falls back to the QEMU shutdown door.
    let acpi_info = arch::x86::acpi::init();
    match acpi_info {
        Some(info) => {
            arch::x86::power::set_power_info(info.power);
        }
        None => {
            serial_println!("ACPI: not found, poweroff will use the QEMU fallback door");
            arch::x86::power::set_power_info(None);
        }
    }

    // Phase 5: block device
    drivers::storage::ata::init();

    // Phase 6: virtual filesystem
    fs::vfs::init();

    // Phase 7: scheduler and syscall gate
    task::scheduler::init();
    syscall::init();

    unsafe {
        core::arch::asm!("sti");
    }
    serial_println!("[OK] Interrupts enabled");

    serial_println!("");
    serial_println!("flopkernel initialization complete, entering scheduler.");

    task::scheduler::start();
}
