//! Hardware abstraction layer — the primitives the rest of the kernel uses
//! instead of reaching into `arch::x86::*` directly.
//!
//! This is a single-CPU, 32-bit x86 kernel, so unlike a multi-architecture
//! HAL there is nothing to `cfg`-gate here: every function is a thin,
//! `#[inline]` wrapper around one or two instructions or an `arch::x86`
//! module call.

/// Enable interrupts on the CPU.
#[inline]
pub fn enable_interrupts() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack)); }
}

/// Disable interrupts on the CPU.
#[inline]
pub fn disable_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack)); }
}

/// Check whether interrupts are currently enabled (EFLAGS.IF).
#[inline]
pub fn interrupts_enabled() -> bool {
    let eflags: u32;
    unsafe { core::arch::asm!("pushfd; pop {0:e}", out(reg) eflags, options(nomem)); }
    eflags & 0x200 != 0
}

/// Halt the CPU until the next interrupt.
#[inline]
pub fn halt() {
    unsafe { core::arch::asm!("hlt", options(nomem, nostack)); }
}

/// Save the current interrupt state and disable interrupts. The returned
/// value must be passed back to [`restore_interrupt_state`].
#[inline]
pub fn save_and_disable_interrupts() -> u32 {
    let eflags: u32;
    unsafe {
        core::arch::asm!("pushfd; pop {0:e}", out(reg) eflags, options(nomem, preserves_flags));
        core::arch::asm!("cli", options(nomem, nostack, preserves_flags));
    }
    eflags
}

/// Restore interrupt state previously saved by [`save_and_disable_interrupts`].
#[inline]
pub fn restore_interrupt_state(saved: u32) {
    if saved & 0x200 != 0 {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)); }
    }
}

/// Current monotonic tick count, driven by the PIT at [`timer_frequency_hz`].
#[inline]
pub fn timer_current_ticks() -> u32 {
    crate::arch::x86::pit::get_ticks()
}

/// Tick frequency in Hz.
#[inline]
pub fn timer_frequency_hz() -> u32 {
    crate::arch::x86::pit::TICK_HZ
}

/// Read CR3 (the current page directory's physical address).
#[inline]
pub fn current_page_table() -> u32 {
    let cr3: u32;
    unsafe { core::arch::asm!("mov {0:e}, cr3", out(reg) cr3, options(nomem, nostack)); }
    cr3
}

/// Load CR3 with a new page directory's physical address.
#[inline]
pub fn switch_page_table(phys_addr: u32) {
    unsafe { core::arch::asm!("mov cr3, {0:e}", in(reg) phys_addr, options(nostack)); }
}

/// Invalidate a single page's TLB entry.
#[inline]
pub fn flush_tlb(vaddr: u32) {
    unsafe { core::arch::asm!("invlpg [{0:e}]", in(reg) vaddr, options(nostack)); }
}

/// Flush the entire TLB by reloading CR3.
#[inline]
pub fn flush_tlb_all() {
    switch_page_table(current_page_table());
}

/// Set the ring-0 stack pointer the CPU switches to on a privilege-level
/// change (TSS.ESP0), used by the scheduler on every context switch.
#[inline]
pub fn set_kernel_stack(esp0: u32) {
    crate::arch::x86::tss::set_kernel_stack(esp0);
}

/// Acknowledge an IRQ at the interrupt controller.
#[inline]
pub fn irq_eoi(irq: u8) {
    crate::arch::x86::pic::send_eoi(irq);
}
