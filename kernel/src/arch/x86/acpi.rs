//! ACPI table discovery: RSDP → RSDT → FADT/MADT, and a mini-AML scan of the
//! DSDT for the `_S5_` sleep package.
//!
//! This stops well short of a general AML interpreter — it walks just enough
//! of the byte stream to skip past objects it doesn't care about and to pull
//! the handful of integers that make up the S5 package. [`power::poweroff`]
//! is the only consumer of what this module finds.

use alloc::vec::Vec;

const RSDP_SIGNATURE: [u8; 8] = *b"RSD PTR ";
const BIOS_ROM_START: usize = 0x000E_0000;
const BIOS_ROM_END: usize = 0x0010_0000;
const EBDA_PTR_ADDR: usize = 0x040E;
const EBDA_WINDOW: usize = 1024;

const SDT_HEADER_SIZE: u32 = 36;

#[repr(C, packed)]
struct Rsdp {
    signature: [u8; 8],
    checksum: u8,
    oem_id: [u8; 6],
    revision: u8,
    rsdt_address: u32,
}

#[repr(C, packed)]
struct SdtHeader {
    signature: [u8; 4],
    length: u32,
    revision: u8,
    checksum: u8,
    oem_id: [u8; 6],
    oem_table_id: [u8; 8],
    oem_revision: u32,
    creator_id: u32,
    creator_revision: u32,
}

/// A discovered CPU from the MADT's LAPIC entries. Kept only for logging —
/// this kernel never starts a second processor.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorInfo {
    pub acpi_id: u8,
    pub apic_id: u8,
}

/// Ports and S5 sleep values captured from the FADT/DSDT, sufficient to
/// sequence a poweroff. See [`crate::arch::x86::power`].
pub struct PowerInfo {
    pub smi_cmd: u16,
    pub acpi_enable: u8,
    pub pm1a_cnt: u16,
    pub pm1b_cnt: u16,
    pub sci_en_bit: u16,
    pub slp_typa: u16,
    pub slp_typb: u16,
    pub slp_en_bit: u16,
    pub has_pm1b: bool,
}

pub struct AcpiInfo {
    pub processors: Vec<ProcessorInfo>,
    pub power: Option<PowerInfo>,
}

fn checksum_ok(ptr: *const u8, len: usize) -> bool {
    let mut sum: u8 = 0;
    for i in 0..len {
        sum = sum.wrapping_add(unsafe { ptr.add(i).read() });
    }
    sum == 0
}

fn find_rsdp_in(start: usize, end: usize) -> Option<*const Rsdp> {
    let mut addr = start;
    while addr + 8 <= end {
        let sig = unsafe { (addr as *const [u8; 8]).read_unaligned() };
        if sig == RSDP_SIGNATURE {
            let rsdp = addr as *const Rsdp;
            if checksum_ok(rsdp as *const u8, 20) {
                return Some(rsdp);
            }
        }
        addr += 16;
    }
    None
}

fn find_rsdp() -> Option<*const Rsdp> {
    if let Some(p) = find_rsdp_in(BIOS_ROM_START, BIOS_ROM_END) {
        return Some(p);
    }
    let ebda_seg = unsafe { (EBDA_PTR_ADDR as *const u16).read_unaligned() };
    let ebda_start = (ebda_seg as usize) << 4;
    if ebda_start > 0 && ebda_start < 0xA0000 {
        return find_rsdp_in(ebda_start, ebda_start + EBDA_WINDOW);
    }
    None
}

fn header_at(phys: u32) -> Option<(*const SdtHeader, [u8; 4], u32)> {
    let hdr = phys as *const SdtHeader;
    let sig = unsafe { core::ptr::addr_of!((*hdr).signature).read_unaligned() };
    let len = unsafe { core::ptr::addr_of!((*hdr).length).read_unaligned() };
    if len < SDT_HEADER_SIZE || !checksum_ok(phys as *const u8, len as usize) {
        return None;
    }
    Some((hdr, sig, len))
}

/// Scan for the RSDP, walk the RSDT, and return whatever MADT/FADT data we
/// can recover. `None` means "no ACPI" — poweroff falls back to the QEMU
/// door and CPU enumeration falls back to a single BSP.
pub fn init() -> Option<AcpiInfo> {
    let rsdp = find_rsdp()?;
    let rsdt_phys = unsafe { core::ptr::addr_of!((*rsdp).rsdt_address).read_unaligned() };

    let (rsdt_hdr, sig, len) = header_at(rsdt_phys)?;
    if &sig != b"RSDT" {
        crate::serial_println!("ACPI: RSDT signature mismatch");
        return None;
    }
    let num_entries = (len - SDT_HEADER_SIZE) / 4;
    let entries = (rsdt_hdr as u32 + SDT_HEADER_SIZE) as *const u32;

    let mut processors = Vec::new();
    let mut power = None;

    for i in 0..num_entries {
        let table_phys = unsafe { entries.add(i as usize).read_unaligned() };
        let Some((table_hdr, table_sig, table_len)) = header_at(table_phys) else {
            continue;
        };
        match &table_sig {
            b"APIC" => parse_madt(table_hdr as u32, table_len, &mut processors),
            b"FACP" => power = parse_facp(table_phys),
            _ => {}
        }
    }

    crate::serial_println!(
        "ACPI: {} CPU(s) via MADT, poweroff {}",
        processors.len(),
        if power.is_some() { "available" } else { "unavailable" }
    );

    Some(AcpiInfo { processors, power })
}

const MADT_LAPIC: u8 = 0;

fn parse_madt(madt_phys: u32, table_len: u32, processors: &mut Vec<ProcessorInfo>) {
    let entries_start = madt_phys + SDT_HEADER_SIZE + 8;
    let entries_end = madt_phys + table_len;
    let mut off = entries_start;
    while off + 2 <= entries_end {
        let entry_type = unsafe { (off as *const u8).read() };
        let entry_len = unsafe { ((off + 1) as *const u8).read() } as u32;
        if entry_len < 2 {
            break;
        }
        if entry_type == MADT_LAPIC && entry_len >= 8 {
            let acpi_id = unsafe { ((off + 2) as *const u8).read() };
            let apic_id = unsafe { ((off + 3) as *const u8).read() };
            let flags = unsafe { ((off + 4) as *const u32).read_unaligned() };
            if flags & 1 != 0 {
                processors.push(ProcessorInfo { acpi_id, apic_id });
            }
        }
        off += entry_len;
    }
}

/// Field offsets below match the ACPI 1.0 FADT layout used by every BIOS and
/// QEMU's emulated one: `dsdt` at 40, `smi_cmd` at 48, `acpi_enable`/`acpi_disable`
/// at 52/53, `pm1a_cnt_blk`/`pm1b_cnt_blk` at 64/68.
fn parse_facp(facp_phys: u32) -> Option<PowerInfo> {
    let read_u32 = |off: u32| unsafe { ((facp_phys + off) as *const u32).read_unaligned() };
    let read_u8 = |off: u32| unsafe { ((facp_phys + off) as *const u8).read() };

    let dsdt_phys = read_u32(40);
    let smi_cmd = read_u32(48) as u16;
    let acpi_enable = read_u8(52);
    let pm1a_cnt = read_u32(64) as u16;
    let pm1b_cnt = read_u32(68) as u16;

    let (slp_typa, slp_typb) = eval_s5(dsdt_phys)?;

    Some(PowerInfo {
        smi_cmd,
        acpi_enable,
        pm1a_cnt,
        pm1b_cnt,
        sci_en_bit: 1,
        slp_typa: slp_typa << 10,
        slp_typb: slp_typb << 10,
        slp_en_bit: 1 << 13,
        has_pm1b: pm1b_cnt != 0,
    })
}

// AML opcodes this mini-scanner recognizes.
const AML_OP_ZERO: u8 = 0x00;
const AML_OP_ONE: u8 = 0x01;
const AML_OP_NAME: u8 = 0x08;
const AML_OP_BYTE_PREFIX: u8 = 0x0A;
const AML_OP_WORD_PREFIX: u8 = 0x0B;
const AML_OP_DWORD_PREFIX: u8 = 0x0C;
const AML_OP_PACKAGE: u8 = 0x12;

fn aml_pkglen(ptr: *const u8) -> (u32, u32) {
    let b0 = unsafe { ptr.read() };
    let count = b0 >> 6;
    if count == 0 {
        return ((b0 & 0x3F) as u32, 1);
    }
    let mut len = (b0 & 0x0F) as u32;
    for i in 0..count {
        let byte = unsafe { ptr.add(1 + i as usize).read() };
        len |= (byte as u32) << (4 + i * 8);
    }
    (len, 1 + count as u32)
}

fn aml_parse_int(ptr: *const u8) -> (u32, u32) {
    let op = unsafe { ptr.read() };
    match op {
        AML_OP_ZERO => (0, 1),
        AML_OP_ONE => (1, 1),
        AML_OP_BYTE_PREFIX => (unsafe { ptr.add(1).read() } as u32, 2),
        AML_OP_WORD_PREFIX => (unsafe { (ptr.add(1) as *const u16).read_unaligned() } as u32, 3),
        AML_OP_DWORD_PREFIX => (unsafe { (ptr.add(1) as *const u32).read_unaligned() }, 5),
        _ => (0, 1),
    }
}

/// Linear byte-stream scan for `Name("_S5_", Package { a, b, ... })`.
/// Returns `(slp_typa, slp_typb)` unshifted.
fn eval_s5(dsdt_phys: u32) -> Option<(u16, u16)> {
    let (hdr, sig, len) = header_at(dsdt_phys)?;
    if &sig != b"DSDT" {
        return None;
    }
    let start = hdr as u32 + SDT_HEADER_SIZE;
    let end = hdr as u32 + len;
    let mut addr = start;

    while addr + 5 < end {
        let op = unsafe { (addr as *const u8).read() };
        if op == AML_OP_NAME {
            let name = unsafe { ((addr + 1) as *const [u8; 4]).read_unaligned() };
            if &name == b"_S5_" {
                let val_ptr = (addr + 5) as *const u8;
                if unsafe { val_ptr.read() } == AML_OP_PACKAGE {
                    let (_pkg_len, pkg_bytes) = aml_pkglen(unsafe { val_ptr.add(1) });
                    let mut contents = unsafe { val_ptr.add(1 + pkg_bytes as usize) };
                    let num_elements = unsafe { contents.read() };
                    contents = unsafe { contents.add(1) };
                    if num_elements >= 2 {
                        let (a, adv) = aml_parse_int(contents);
                        contents = unsafe { contents.add(adv as usize) };
                        let (b, _) = aml_parse_int(contents);
                        return Some((a as u16, b as u16));
                    }
                }
                return None;
            }
        }
        addr += 1;
    }
    None
}
