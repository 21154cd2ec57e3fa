//! 8254 Programmable Interval Timer (PIT) driver.
//!
//! Configures channel 0 in square-wave mode at [`TICK_HZ`] (100 Hz) and
//! exposes the free-running tick counter the scheduler's timeslice
//! accounting and `sleep` queue are built on.

use crate::arch::x86::port::outb;
use core::sync::atomic::{AtomicU32, Ordering};

const PIT_CHANNEL0: u16 = 0x40;
const PIT_CMD: u16 = 0x43;
/// Base oscillator frequency of the 8254 PIT in Hz.
const PIT_FREQUENCY: u32 = 1193182;

/// Configured scheduler tick rate in Hz.
pub const TICK_HZ: u32 = 100;

/// Ticks elapsed since boot, advanced by the timer IRQ handler.
pub static TICK_COUNT: AtomicU32 = AtomicU32::new(0);

/// Program PIT channel 0 to fire at [`TICK_HZ`] interrupts per second.
pub fn init() {
    let divisor = PIT_FREQUENCY / TICK_HZ;

    unsafe {
        // Channel 0, lobyte/hibyte, mode 3 (square wave), binary
        outb(PIT_CMD, 0x36);
        outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        outb(PIT_CHANNEL0, ((divisor >> 8) & 0xFF) as u8);
    }

    crate::arch::x86::pic::unmask(0);

    crate::serial_println!("[OK] PIT initialized ({} Hz, divisor {})", TICK_HZ, divisor);
}

/// Advance the tick counter. Called from the timer IRQ handler.
#[inline]
pub fn tick() {
    TICK_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Return the current tick count since boot.
#[inline]
pub fn get_ticks() -> u32 {
    TICK_COUNT.load(Ordering::Relaxed)
}

/// Busy-wait for the specified number of milliseconds.
pub fn delay_ms(ms: u32) {
    let ticks = (ms * TICK_HZ) / 1000;
    let ticks = if ticks == 0 { 1 } else { ticks };
    let start = get_ticks();
    while get_ticks().wrapping_sub(start) < ticks {
        core::hint::spin_loop();
    }
}
