//! Global Descriptor Table (GDT) for 32-bit protected mode.
//!
//! Single flat GDT shared by the one CPU this kernel runs on: null
//! descriptor, kernel code/data, user code/data, and one TSS descriptor.
//! All code/data segments span the full 4 GiB linear range with paging
//! doing the actual access control — segmentation itself is unused beyond
//! selecting a privilege level.
//!
//! GDT layout:
//!   0x00: Null
//!   0x08: Kernel Code (DPL=0)
//!   0x10: Kernel Data (DPL=0)
//!   0x18: User Code (DPL=3)
//!   0x20: User Data (DPL=3)
//!   0x28: TSS

use core::arch::asm;
use core::mem::size_of;

pub const KERNEL_CODE_SEL: u16 = 0x08;
pub const KERNEL_DATA_SEL: u16 = 0x10;
pub const USER_CODE_SEL: u16 = 0x18;
pub const USER_DATA_SEL: u16 = 0x20;
pub const TSS_SEL: u16 = 0x28;

#[repr(C, packed)]
#[derive(Copy, Clone)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    flags_limit_high: u8,
    base_high: u8,
}

#[repr(C, packed)]
struct GdtDescriptor {
    size: u16,
    offset: u32,
}

const GDT_ENTRIES: usize = 6;

static mut GDT: [GdtEntry; GDT_ENTRIES] = [GdtEntry {
    limit_low: 0,
    base_low: 0,
    base_mid: 0,
    access: 0,
    flags_limit_high: 0,
    base_high: 0,
}; GDT_ENTRIES];

static mut GDT_DESC: GdtDescriptor = GdtDescriptor { size: 0, offset: 0 };

fn make_entry(base: u32, limit: u32, access: u8, flags: u8) -> GdtEntry {
    GdtEntry {
        limit_low: (limit & 0xFFFF) as u16,
        base_low: (base & 0xFFFF) as u16,
        base_mid: ((base >> 16) & 0xFF) as u8,
        access,
        flags_limit_high: ((limit >> 16) & 0x0F) as u8 | (flags << 4),
        base_high: ((base >> 24) & 0xFF) as u8,
    }
}

const TSS_INDEX: usize = 5;

/// Install the TSS descriptor into the GDT and reload the GDTR so the new
/// entry is visible before `ltr` is executed.
pub fn set_tss_entry(base: u32, limit: u32) {
    unsafe {
        // Access 0x89 = Present, DPL=0, Type=1001 (32-bit TSS, not busy)
        GDT[TSS_INDEX] = make_entry(base, limit, 0x89, 0x0);
    }
    reload_gdtr();
}

/// Clear the TSS busy bit so `ltr` can be re-executed (e.g. after a fault
/// that left the busy flag set).
pub fn clear_tss_busy_bit() {
    unsafe {
        let access_ptr = (GDT.as_ptr() as *const u8).add(TSS_INDEX * 8 + 5) as *mut u8;
        let access = core::ptr::read_volatile(access_ptr);
        core::ptr::write_volatile(access_ptr, access & !0x02);
    }
}

fn reload_gdtr() {
    unsafe {
        GDT_DESC = GdtDescriptor {
            size: (GDT_ENTRIES * size_of::<GdtEntry>() - 1) as u16,
            offset: GDT.as_ptr() as u32,
        };
        asm!(
            "lgdt [{}]",
            in(reg) &GDT_DESC as *const GdtDescriptor,
            options(nostack, preserves_flags)
        );
    }
}

/// Initialize the GDT with kernel/user segments and load it via `lgdt`.
pub fn init() {
    unsafe {
        GDT[0] = make_entry(0, 0, 0, 0);

        // Kernel Code — Ring 0. Access 0x9A = P=1,DPL=0,S=1,Type=1010 (exec/read).
        // Flags 0xC = G=1 (4 KiB granularity), D=1 (32-bit).
        GDT[1] = make_entry(0, 0xFFFFF, 0x9A, 0xC);

        // Kernel Data — Ring 0. Access 0x92 = P=1,DPL=0,S=1,Type=0010 (r/w).
        GDT[2] = make_entry(0, 0xFFFFF, 0x92, 0xC);

        // User Code — Ring 3. Access 0xFA = P=1,DPL=3,S=1,Type=1010.
        GDT[3] = make_entry(0, 0xFFFFF, 0xFA, 0xC);

        // User Data — Ring 3. Access 0xF2 = P=1,DPL=3,S=1,Type=0010.
        GDT[4] = make_entry(0, 0xFFFFF, 0xF2, 0xC);

        // Entry 5 (TSS) is filled in by `set_tss_entry` once the TSS exists.

        GDT_DESC = GdtDescriptor {
            size: (GDT_ENTRIES * size_of::<GdtEntry>() - 1) as u16,
            offset: GDT.as_ptr() as u32,
        };

        asm!(
            "lgdt [{}]",
            in(reg) &GDT_DESC as *const GdtDescriptor,
            options(nostack, preserves_flags)
        );

        asm!(
            "mov ax, 0x10",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            options(nostack)
        );

        // Far jump to reload CS with the kernel code selector.
        asm!(
            "push 0x08",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            tmp = out(reg) _,
            options(nostack)
        );
    }

    crate::serial_println!("[OK] GDT initialized");
}
