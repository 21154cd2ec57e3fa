//! x86 (i686) architecture support.
//!
//! Provides GDT, IDT, TSS, the legacy PIC and PIT, I/O port access, dynamic
//! IRQ dispatch, and ACPI table discovery plus poweroff. Uniprocessor only —
//! no LAPIC/IOAPIC routing and no AP bootstrap.

pub mod acpi;
pub mod gdt;
pub mod idt;
pub mod irq;
pub mod pic;
pub mod pit;
pub mod port;
pub mod power;
pub mod tss;
