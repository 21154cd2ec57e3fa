//! Interrupt Descriptor Table (IDT) for 32-bit protected mode.
//!
//! Populates 256 gate descriptors: CPU exceptions (vectors 0-31), hardware
//! IRQs remapped to vectors 0x20-0x2F, and the `int 0x50` syscall trap gate
//! (DPL 3, so ring 3 code can invoke it). A generated stub table (outside
//! this crate, linked in via `ANYOS_ASM_OBJECTS`) supplies the 256 entry
//! points; each stub pushes a vector number and error code (0 if the CPU
//! didn't push one), saves GPRs and segment registers, and calls into
//! [`isr_handler`] or [`irq_handler`] with a pointer to an [`InterruptFrame`].

use core::arch::asm;
use core::mem::size_of;

const IDT_ENTRIES: usize = 256;
const KERNEL_CODE_SEG: u16 = 0x08;

/// 32-bit IDT gate descriptor (8 bytes).
#[repr(C, packed)]
#[derive(Copy, Clone)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

#[repr(C, packed)]
struct IdtDescriptor {
    size: u16,
    offset: u32,
}

static mut IDT: [IdtEntry; IDT_ENTRIES] = [IdtEntry {
    offset_low: 0,
    selector: 0,
    zero: 0,
    type_attr: 0,
    offset_high: 0,
}; IDT_ENTRIES];

static mut IDT_DESC: IdtDescriptor = IdtDescriptor { size: 0, offset: 0 };

const GATE_INTERRUPT: u8 = 0x8E; // Present, DPL=0, 32-bit interrupt gate
const GATE_TRAP_DPL3: u8 = 0xEF; // Present, DPL=3, 32-bit trap gate (syscalls)

fn set_gate(num: usize, handler: unsafe extern "C" fn(), selector: u16, type_attr: u8) {
    let handler = handler as *const () as u32;
    unsafe {
        IDT[num] = IdtEntry {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        };
    }
}

// Stub entry points supplied by the generated assembly stub table.
extern "C" {
    fn isr0();  fn isr1();  fn isr2();  fn isr3();
    fn isr4();  fn isr5();  fn isr6();  fn isr7();
    fn isr8();  fn isr9();  fn isr10(); fn isr11();
    fn isr12(); fn isr13(); fn isr14(); fn isr15();
    fn isr16(); fn isr17(); fn isr18(); fn isr19();
    fn isr20(); fn isr21(); fn isr22(); fn isr23();
    fn isr24(); fn isr25(); fn isr26(); fn isr27();
    fn isr28(); fn isr29(); fn isr30(); fn isr31();

    fn irq0();  fn irq1();  fn irq2();  fn irq3();
    fn irq4();  fn irq5();  fn irq6();  fn irq7();
    fn irq8();  fn irq9();  fn irq10(); fn irq11();
    fn irq12(); fn irq13(); fn irq14(); fn irq15();

    fn syscall_entry();
}

/// Populate the IDT with exception, IRQ, and syscall gates, then load via `lidt`.
pub fn init() {
    set_gate(0,  isr0 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(1,  isr1 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(2,  isr2 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(3,  isr3 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(4,  isr4 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(5,  isr5 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(6,  isr6 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(7,  isr7 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(8,  isr8 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(9,  isr9 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(10, isr10, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(11, isr11, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(12, isr12, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(13, isr13, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(14, isr14, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(15, isr15, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(16, isr16, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(17, isr17, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(18, isr18, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(19, isr19, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(20, isr20, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(21, isr21, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(22, isr22, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(23, isr23, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(24, isr24, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(25, isr25, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(26, isr26, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(27, isr27, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(28, isr28, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(29, isr29, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(30, isr30, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(31, isr31, KERNEL_CODE_SEG, GATE_INTERRUPT);

    // Hardware IRQs, remapped to vectors 0x20-0x2F by the PIC.
    set_gate(0x20, irq0 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x21, irq1 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x22, irq2 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x23, irq3 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x24, irq4 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x25, irq5 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x26, irq6 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x27, irq7 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x28, irq8 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x29, irq9 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x2A, irq10, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x2B, irq11, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x2C, irq12, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x2D, irq13, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x2E, irq14, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(0x2F, irq15, KERNEL_CODE_SEG, GATE_INTERRUPT);

    // Syscall: int 0x50, DPL=3 trap gate so ring 3 code can invoke it.
    set_gate(0x50, syscall_entry, KERNEL_CODE_SEG, GATE_TRAP_DPL3);

    unsafe {
        IDT_DESC = IdtDescriptor {
            size: (IDT_ENTRIES * size_of::<IdtEntry>() - 1) as u16,
            offset: (&raw const IDT) as *const _ as u32,
        };
        asm!(
            "lidt [{}]",
            in(reg) &raw const IDT_DESC,
            options(nostack, preserves_flags)
        );
    }

    crate::serial_println!("[OK] IDT initialized (256 gates)");
}

/// Interrupt/exception stack frame for 32-bit protected mode.
///
/// Matches the common ISR stub's push order: segment registers (gs, fs, es,
/// ds, most-recently-pushed first), then `pusha`'s eight GPRs, then the
/// stub-pushed vector number and error code, then whatever the CPU itself
/// pushed (`eip`, `cs`, `eflags`, and `esp`/`ss` only on a privilege-level
/// change). `user_esp`/`user_ss` are only meaningful when `cs & 3 != 0`.
#[repr(C)]
pub struct InterruptFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub user_esp: u32,
    pub user_ss: u32,
}

impl InterruptFrame {
    #[inline]
    pub fn is_user_mode(&self) -> bool {
        self.cs & 3 != 0
    }
}

/// CPU exception handler called from the assembly ISR stubs (vectors 0-31).
///
/// Division-by-zero, invalid opcode, and general-protection faults log the
/// faulting context and halt the CPU; page faults additionally read CR2.
/// There is no user-process fault recovery here — any fault is fatal, kernel
/// or user, matching the "log then halt" discipline used throughout boot.
#[no_mangle]
pub extern "C" fn isr_handler(frame: &InterruptFrame) {
    match frame.int_no {
        0 => {
            crate::serial_println!(
                "EXCEPTION: Divide by zero at EIP={:#010x} CS={:#x}",
                frame.eip, frame.cs
            );
            halt();
        }
        6 => {
            crate::serial_println!(
                "EXCEPTION: Invalid opcode at EIP={:#010x} CS={:#x}",
                frame.eip, frame.cs
            );
            halt();
        }
        13 => {
            crate::serial_println!(
                "EXCEPTION: General protection fault err={:#x} EIP={:#010x} CS={:#x}",
                frame.err_code, frame.eip, frame.cs
            );
            halt();
        }
        14 => {
            let cr2: u32;
            unsafe { asm!("mov {}, cr2", out(reg) cr2) };
            crate::serial_println!(
                "EXCEPTION: Page fault addr={:#010x} err={:#x} EIP={:#010x} CS={:#x}",
                cr2, frame.err_code, frame.eip, frame.cs
            );
            halt();
        }
        n => {
            crate::serial_println!("EXCEPTION: Unhandled vector #{} at EIP={:#010x}", n, frame.eip);
            halt();
        }
    }
}

fn halt() -> ! {
    loop {
        unsafe { asm!("cli", "hlt", options(nomem, nostack)) };
    }
}

/// Hardware IRQ dispatcher called from the assembly IRQ stubs (vectors 32+).
///
/// Acknowledges the PIC before any scheduling side effect so a context
/// switch triggered by the timer tick never leaves an un-EOI'd controller
/// behind.
#[no_mangle]
pub extern "C" fn irq_handler(frame: &InterruptFrame) {
    let irq = (frame.int_no - 0x20) as u8;

    match irq {
        0 => {
            crate::arch::x86::pit::tick();
            crate::arch::x86::pic::send_eoi(irq);
            crate::task::scheduler::sched_tick();
        }
        _ => {
            crate::arch::x86::pic::send_eoi(irq);
            crate::arch::x86::irq::dispatch_irq(irq);
        }
    }
}

/// Syscall gate handler called from the `int 0x50` assembly stub.
///
/// Marshals `{eax=num, ebx, ecx, edx, esi, edi}` into the syscall router and
/// writes the return value back into the frame's `eax` so the stub's
/// `pop`/`iret` sequence returns it to the caller.
#[no_mangle]
pub extern "C" fn syscall_handler(frame: &mut InterruptFrame) {
    let ret = crate::syscall::dispatch(
        frame.eax,
        frame.ebx,
        frame.ecx,
        frame.edx,
        frame.esi,
        frame.edi,
    );
    frame.eax = ret as u32;
}
