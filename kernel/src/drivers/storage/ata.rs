//! ATA PIO disk driver for the primary IDE controller.
//!
//! Supports 28-bit LBA sector read/write via I/O ports 0x1F0-0x1F7. Detects
//! the primary master drive via IDENTIFY, then serves `read_sectors`/
//! `write_sectors` through a FIFO request queue drained by the IRQ14
//! handler: `submit` starts the drive only on the empty-to-non-empty
//! transition, and every subsequent sector is pushed through by the
//! interrupt rather than by polling DRQ from the submitter's stack.

use crate::arch::x86::port::{inb, inw, outb, outw};
use crate::sync::spinlock::Spinlock;
use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicBool, Ordering};

// ATA PIO ports (primary controller)
/// ATA data register (16-bit read/write).
const ATA_DATA: u16 = 0x1F0;
const ATA_ERROR: u16 = 0x1F1;
const ATA_SECTOR_COUNT: u16 = 0x1F2;
const ATA_LBA_LO: u16 = 0x1F3;
const ATA_LBA_MID: u16 = 0x1F4;
const ATA_LBA_HI: u16 = 0x1F5;
const ATA_DRIVE_HEAD: u16 = 0x1F6;
const ATA_STATUS: u16 = 0x1F7;
const ATA_COMMAND: u16 = 0x1F7;
/// Device Control Register / Alternate Status (write: control, read: alt status).
/// Bit 1 = nIEN: when set, the device does not assert INTRQ after transfers.
/// This is mandatory for pure PIO-polling drivers — without it, VirtualBox
/// stalls subsequent commands on a single CPU because no IRQ handler clears
/// the pending interrupt line.
const ATA_DEV_CTRL: u16 = 0x3F6;

// Status bits
const STATUS_BSY: u8 = 0x80;
const STATUS_DRDY: u8 = 0x40;
const STATUS_DRQ: u8 = 0x08;
const STATUS_ERR: u8 = 0x01;

// Commands
const CMD_READ_SECTORS: u8 = 0x20;
const CMD_WRITE_SECTORS: u8 = 0x30;
const CMD_IDENTIFY: u8 = 0xEC;

/// Detected ATA drive information (model, sector count, master/slave).
pub struct AtaDrive {
    pub present: bool,
    pub slave: bool,
    pub sectors: u32,
    pub model: [u8; 40],
}

static mut PRIMARY_DRIVE: AtaDrive = AtaDrive {
    present: false,
    slave: false,
    sectors: 0,
    model: [0; 40],
};

/// Legacy IRQ line for the primary IDE controller.
pub const IRQ_PRIMARY: u8 = 14;

#[derive(Copy, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
}

/// A queued block request. `buffer` is a raw pointer rather than a slice
/// reference because the request outlives the submitter's stack frame and
/// is mutated from interrupt context; the submitter is responsible for
/// keeping the backing pages pinned until `completion` runs.
pub struct BlockRequest {
    kind: RequestKind,
    lba: u32,
    sector_count: u8,
    buffer: *mut u8,
    sectors_done: u8,
    completion: fn(*mut u8, bool),
}

unsafe impl Send for BlockRequest {}

static QUEUE: Spinlock<VecDeque<BlockRequest>> = Spinlock::new(VecDeque::new());

fn buffer_slice(req: &BlockRequest) -> &mut [u8] {
    unsafe { core::slice::from_raw_parts_mut(req.buffer, req.sector_count as usize * 512) }
}

/// Program the controller's head/LBA/sector-count/command registers and
/// start the drive on the first not-yet-transferred sector of `req`. Called
/// only on the empty-to-non-empty transition or right after the previous
/// head request has fully completed.
fn start_request(req: &mut BlockRequest) {
    if !wait_bsy() {
        crate::serial_println!("  ATA: controller busy timeout, dropping request");
        return;
    }

    let lba = req.lba + req.sectors_done as u32;
    let remaining = req.sector_count - req.sectors_done;

    unsafe {
        outb(ATA_DRIVE_HEAD, 0xE0 | ((lba >> 24) & 0x0F) as u8);
        outb(ATA_SECTOR_COUNT, remaining);
        outb(ATA_LBA_LO, (lba & 0xFF) as u8);
        outb(ATA_LBA_MID, ((lba >> 8) & 0xFF) as u8);
        outb(ATA_LBA_HI, ((lba >> 16) & 0xFF) as u8);
        outb(ATA_COMMAND, match req.kind {
            RequestKind::Read => CMD_READ_SECTORS,
            RequestKind::Write => CMD_WRITE_SECTORS,
        });
    }
    ata_delay_400ns();

    // WRITE SECTORS raises its first IRQ only after the host has already
    // pushed the first sector's data — the device has nothing to signal
    // readiness for otherwise. READ SECTORS needs no such priming; its
    // first IRQ arrives once the device itself has the first sector ready.
    if req.kind == RequestKind::Write {
        if !wait_drq() {
            crate::serial_println!("  ATA: write priming DRQ timeout");
            return;
        }
        write_one_sector(req);
    }
}

fn read_one_sector(req: &mut BlockRequest) {
    let sector = req.sectors_done as usize;
    let buf = buffer_slice(req);
    let offset = sector * 512;
    unsafe {
        for i in (0..512).step_by(2) {
            let word = inw(ATA_DATA);
            buf[offset + i] = word as u8;
            buf[offset + i + 1] = (word >> 8) as u8;
        }
    }
    req.sectors_done += 1;
}

fn write_one_sector(req: &mut BlockRequest) {
    let sector = req.sectors_done as usize;
    let buf = buffer_slice(req);
    let offset = sector * 512;
    unsafe {
        for i in (0..512).step_by(2) {
            let word = (buf[offset + i + 1] as u16) << 8 | buf[offset + i] as u16;
            outw(ATA_DATA, word);
        }
    }
    req.sectors_done += 1;
}

/// Enqueue a block request. Returns `false` if `sector_count` is out of
/// `[1, 256]` or `buffer` is null — both caller bugs per the queue contract.
///
/// `completion` runs in interrupt context and must not block.
pub fn submit(
    kind: RequestKind,
    lba: u32,
    sector_count: u16,
    buffer: *mut u8,
    completion: fn(*mut u8, bool),
) -> bool {
    if sector_count == 0 || sector_count > 256 || buffer.is_null() {
        return false;
    }
    // 256 sectors is encoded as a zero sector-count byte on real hardware;
    // this queue only ever completes requests sector-by-sector so it stores
    // the truncating u8 and treats 256 as 0 consistently on both write and compare.
    let req = BlockRequest {
        kind,
        lba,
        sector_count: sector_count as u8,
        buffer,
        sectors_done: 0,
        completion,
    };

    let mut queue = QUEUE.lock();
    let was_empty = queue.is_empty();
    queue.push_back(req);
    if was_empty {
        start_request(&mut queue[0]);
    }
    true
}

/// IRQ14 handler: acknowledges the device, drains the head request by one
/// sector, and completes/starts-next when it finishes. Uses `try_lock` so a
/// submitter already holding the queue lock on this CPU is never deadlocked
/// against its own interrupt (spinlocks mask interrupts while held, so this
/// can only happen via a nested IRQ on a controller bug, but the contract
/// is cheap to honor regardless).
pub fn irq_handler(_irq: u8) {
    let status = unsafe { inb(ATA_STATUS) };

    let mut queue = match QUEUE.try_lock() {
        Some(q) => q,
        None => return,
    };
    if queue.is_empty() {
        return;
    }

    if status & STATUS_ERR != 0 {
        let err_reg = unsafe { inb(ATA_ERROR) };
        crate::serial_println!("  ATA: request failed, status={:#x} error={:#x}", status, err_reg);
        let req = queue.pop_front().unwrap();
        (req.completion)(req.buffer, false);
        if let Some(next) = queue.front_mut() {
            start_request(next);
        }
        return;
    }

    let finished = {
        let req = &mut queue[0];
        match req.kind {
            RequestKind::Read => read_one_sector(req),
            // The IRQ after the last sector's data was pushed only signals
            // completion — there is nothing further to write for it.
            RequestKind::Write => {
                if req.sectors_done < req.sector_count {
                    write_one_sector(req);
                }
            }
        }
        req.sectors_done >= req.sector_count
    };

    if finished {
        let req = queue.pop_front().unwrap();
        (req.completion)(req.buffer, true);
        if let Some(next) = queue.front_mut() {
            start_request(next);
        }
    }
}

fn wait_bsy() -> bool {
    unsafe {
        for _ in 0..1_000_000u32 {
            let s = inb(ATA_STATUS);
            if s == 0xFF {
                return false; // floating bus — no controller
            }
            if s & STATUS_BSY == 0 {
                return true;
            }
            core::hint::spin_loop();
        }
        false // timeout
    }
}

fn wait_drq() -> bool {
    unsafe {
        for _ in 0..1_000_000u32 {
            let s = inb(ATA_STATUS);
            if s == 0xFF {
                return false; // floating bus
            }
            if s & STATUS_ERR != 0 {
                return false;
            }
            if s & STATUS_DRQ != 0 {
                return true;
            }
            core::hint::spin_loop();
        }
        false // timeout
    }
}

/// 400 ns delay required by ATA spec after writing the Command register.
/// Reading the Alternate Status register 4 times costs ≈ 4×100 ns = 400 ns
/// and does NOT clear the interrupt flag (that is only done by reading 0x1F7).
#[inline]
fn ata_delay_400ns() {
    unsafe {
        inb(ATA_DEV_CTRL);
        inb(ATA_DEV_CTRL);
        inb(ATA_DEV_CTRL);
        inb(ATA_DEV_CTRL);
    }
}

/// Detect and identify the primary master ATA drive.
pub fn init() {
    // Try to identify the primary master drive
    unsafe {
        // Quick floating-bus check before touching any controller registers.
        // If there's no IDE controller (e.g. VirtualBox in AHCI mode), all
        // I/O ports return 0xFF. Detect this early to avoid sending commands
        // into the void and then hanging in wait_bsy().
        let probe = inb(ATA_STATUS);
        if probe == 0xFF {
            crate::serial_println!("  ATA: No IDE controller (floating bus)");
            return;
        }

        // nIEN = 0: let the controller assert INTRQ after each sector so the
        // request queue can be drained from IRQ14 instead of by polling DRQ.
        outb(ATA_DEV_CTRL, 0x00);

        outb(ATA_DRIVE_HEAD, 0xA0); // Select master
        outb(ATA_SECTOR_COUNT, 0);
        outb(ATA_LBA_LO, 0);
        outb(ATA_LBA_MID, 0);
        outb(ATA_LBA_HI, 0);
        outb(ATA_COMMAND, CMD_IDENTIFY);

        // Check if drive exists
        let status = inb(ATA_STATUS);
        if status == 0 || status == 0xFF {
            crate::serial_println!("  ATA: No primary master drive detected");
            return;
        }

        if !wait_bsy() {
            crate::serial_println!("  ATA: IDENTIFY timed out (BSY stuck)");
            return;
        }

        // Check for non-ATA drives
        if inb(ATA_LBA_MID) != 0 || inb(ATA_LBA_HI) != 0 {
            crate::serial_println!("  ATA: Non-ATA device on primary master");
            return;
        }

        if !wait_drq() {
            crate::serial_println!("  ATA: IDENTIFY failed (no DRQ)");
            return;
        }

        // Read 256 words of identify data
        let mut identify = [0u16; 256];
        for word in identify.iter_mut() {
            *word = inw(ATA_DATA);
        }

        // Parse model string (words 27-46, swapped byte order)
        let mut model = [0u8; 40];
        for i in 0..20 {
            model[i * 2] = (identify[27 + i] >> 8) as u8;
            model[i * 2 + 1] = identify[27 + i] as u8;
        }

        // Get sector count (LBA28: word 60-61)
        let sectors = (identify[61] as u32) << 16 | identify[60] as u32;

        PRIMARY_DRIVE = AtaDrive {
            present: true,
            slave: false,
            sectors,
            model,
        };

        let model_str = core::str::from_utf8(&model).unwrap_or("???").trim();
        crate::serial_println!(
            "[OK] ATA drive: '{}', {} sectors ({} MiB)",
            model_str,
            sectors,
            sectors / 2048
        );
    }

    crate::arch::x86::irq::register_irq(IRQ_PRIMARY, irq_handler);
    crate::arch::x86::pic::unmask(IRQ_PRIMARY);
}

/// Single in-flight slot used by the blocking `read_sectors`/`write_sectors`
/// convenience wrappers below. Fine for the sequential boot-time callers
/// that use them; anything that wants request-level concurrency should call
/// `submit` directly with its own completion callback.
static SYNC_DONE: AtomicBool = AtomicBool::new(false);
static SYNC_OK: AtomicBool = AtomicBool::new(false);

fn sync_completion(_buf: *mut u8, ok: bool) {
    SYNC_OK.store(ok, Ordering::SeqCst);
    SYNC_DONE.store(true, Ordering::SeqCst);
}

fn submit_and_wait(kind: RequestKind, lba: u32, count: u8, buf: *mut u8) -> bool {
    if !unsafe { PRIMARY_DRIVE.present } {
        return false;
    }
    SYNC_DONE.store(false, Ordering::SeqCst);
    if !submit(kind, lba, count as u16, buf, sync_completion) {
        return false;
    }
    while !SYNC_DONE.load(Ordering::SeqCst) {
        crate::arch::hal::enable_interrupts();
        crate::arch::hal::halt();
    }
    SYNC_OK.load(Ordering::SeqCst)
}

/// Read `count` sectors starting at `lba` into `buf`, blocking until the
/// queued request completes.
pub fn read_sectors(lba: u32, count: u8, buf: &mut [u8]) -> bool {
    if buf.len() < (count as usize) * 512 {
        return false;
    }
    submit_and_wait(RequestKind::Read, lba, count, buf.as_mut_ptr())
}

/// Write `count` sectors starting at `lba` from `buf`, blocking until the
/// queued request completes.
pub fn write_sectors(lba: u32, count: u8, buf: &[u8]) -> bool {
    if buf.len() < (count as usize) * 512 {
        return false;
    }
    submit_and_wait(RequestKind::Write, lba, count, buf.as_ptr() as *mut u8)
}
