//! ACPI poweroff: enable SCI if needed, then write the `_S5_` sleep type
//! into PM1A (and PM1B, if present) control. Falls back to the QEMU
//! shutdown door when no ACPI power info was found at all.

use crate::arch::x86::acpi::PowerInfo;
use crate::arch::x86::port;

const ACPI_ENABLE_LOOP_MAX: u32 = 300;
const QEMU_SHUTDOWN_PORT: u16 = 0x604;
const QEMU_SHUTDOWN_CMD: u16 = 0x2000;

static mut POWER_INFO: Option<PowerInfo> = None;

/// Stash the FADT/S5 data discovered during [`crate::arch::x86::acpi::init`].
pub fn set_power_info(info: Option<PowerInfo>) {
    unsafe {
        POWER_INFO = info;
    }
}

fn enable_sci(info: &PowerInfo) {
    let pm1a = unsafe { port::inw(info.pm1a_cnt) };
    if pm1a & info.sci_en_bit != 0 {
        return;
    }
    if info.smi_cmd == 0 || info.acpi_enable == 0 {
        return;
    }
    unsafe {
        port::outb(info.smi_cmd, info.acpi_enable);
    }
    for _ in 0..ACPI_ENABLE_LOOP_MAX {
        if unsafe { port::inw(info.pm1a_cnt) } & info.sci_en_bit != 0 {
            break;
        }
    }
    if info.has_pm1b {
        for _ in 0..ACPI_ENABLE_LOOP_MAX {
            if unsafe { port::inw(info.pm1b_cnt) } & info.sci_en_bit != 0 {
                break;
            }
        }
    }
}

/// Power off the machine. Tries the ACPI PM1 sleep sequence first; if ACPI
/// was never found (or a real machine ignores the write), falls back to the
/// QEMU/Bochs shutdown door at port `0x604`. Never returns on success.
pub fn poweroff() -> ! {
    let info = unsafe { POWER_INFO.as_ref() };
    if let Some(info) = info {
        enable_sci(info);
        unsafe {
            port::outw(info.pm1a_cnt, info.slp_typa | info.slp_en_bit);
            if info.has_pm1b {
                port::outw(info.pm1b_cnt, info.slp_typb | info.slp_en_bit);
            }
        }
    }

    // ACPI declined (or isn't present); QEMU/Bochs honor this unconditionally.
    unsafe {
        port::outw(QEMU_SHUTDOWN_PORT, QEMU_SHUTDOWN_CMD);
    }

    crate::serial_println!("power: poweroff request had no effect, halting");
    loop {
        unsafe {
            core::arch::asm!("cli; hlt", options(nomem, nostack));
        }
    }
}
