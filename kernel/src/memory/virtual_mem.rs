//! 32-bit two-level virtual memory manager with recursive page-table mapping.
//!
//! Each address space ("region") owns one page directory. The directory's
//! last entry (index 1023) is a self-reference: it points back at the
//! directory's own physical frame. That single trick makes every page table
//! in the *currently active* address space addressable as ordinary memory
//! through the fixed window `[0xFFC00000, 0xFFFFFFFF)`, so editing a PTE
//! never needs a temporary mapping — you just dereference a pointer into
//! that window.
//!
//! Only one address space can be "active" (loaded into the paging root
//! register) at a time. Mutating a non-active region's tables briefly
//! switches the root register to that region, performs the edit through the
//! recursive window, then switches back — done with interrupts masked so a
//! timer tick can never observe the CPU running with someone else's
//! directory loaded.

use crate::memory::address::{PhysAddr, VirtAddr};
use crate::memory::error::{KernelError, Result};
use crate::memory::{physical, FRAME_SIZE};
use crate::sync::spinlock::Spinlock;
use alloc::vec::Vec;
use core::arch::asm;

pub const PAGE_PRESENT: u32 = 1 << 0;
pub const PAGE_WRITABLE: u32 = 1 << 1;
pub const PAGE_USER: u32 = 1 << 2;

/// Directory index of the recursive self-mapping entry.
const RECURSIVE_INDEX: usize = 1023;
/// Virtual base of the page-table window: `[0xFFC00000, 0xFFFFFFFF]`.
const RECURSIVE_BASE: u32 = 0xFFC0_0000;
/// Virtual address of the directory itself, reached through its own
/// recursive entry (`pd_index == pt_index == 1023`).
const SELF_DIRECTORY: u32 = 0xFFFF_F000;

const ENTRIES_PER_TABLE: usize = 1024;

pub const USER_SPACE_START: u32 = 0x0010_0000;
pub const USER_SPACE_END: u32 = 0xC000_0000;
pub const KERNEL_SPACE_START: u32 = 0xC000_0000;
pub const KERNEL_SPACE_END: u32 = 0xFFC0_0000;
pub const MMIO_START: u32 = 0xF000_0000;
pub const MMIO_END: u32 = 0xF800_0000;
pub const DMA_START: u32 = 0x0000_1000;
pub const DMA_END: u32 = 0x0100_0000;
pub const STACK_REGION_START: u32 = 0xB000_0000;
pub const STACK_REGION_END: u32 = 0xBFF0_0000;

/// Bytes identity-mapped at boot so the kernel image, the early pool, and
/// the PMM descriptor array are all reachable before any higher-half
/// mapping exists.
const IDENTITY_MAP_BYTES: u32 = 16 * 1024 * 1024;

#[inline]
fn invalidate_page(va: u32) {
    unsafe { asm!("invlpg [{}]", in(reg) va, options(nostack, preserves_flags)) };
}

#[inline]
fn read_cr3() -> u32 {
    let v: u32;
    unsafe { asm!("mov {}, cr3", out(reg) v, options(nomem, nostack, preserves_flags)) };
    v
}

#[inline]
fn write_cr3(v: u32) {
    unsafe { asm!("mov cr3, {}", in(reg) v, options(nostack, preserves_flags)) };
}

fn pde_ptr(pd_index: usize) -> *mut u32 {
    (SELF_DIRECTORY + (pd_index * 4) as u32) as *mut u32
}

fn pte_ptr(pd_index: usize, pt_index: usize) -> *mut u32 {
    (RECURSIVE_BASE + (pd_index * FRAME_SIZE) as u32 + (pt_index * 4) as u32) as *mut u32
}

/// One named allocation-class window within a region: a bump cursor over
/// `[start, end)` with required alignment and an optional validator run
/// before a candidate run is accepted.
struct AllocClass {
    kind: ClassKind,
    start: u32,
    end: u32,
    align: u32,
    flags: u32,
    cursor: u32,
    wrapped_once: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClassKind {
    Kernel,
    User,
    Mmio,
    Dma,
    Stack,
}

impl AllocClass {
    fn validate(&self, candidate_start: u32, pages: u32) -> bool {
        let _ = pages;
        match self.kind {
            ClassKind::Dma => candidate_start + pages * FRAME_SIZE as u32 <= DMA_END,
            ClassKind::Kernel => candidate_start >= USER_SPACE_END,
            _ => true,
        }
    }
}

/// Number of predefined allocation classes (Kernel/User/Mmio/Dma/Stack).
const NUM_CLASSES: usize = 5;

fn default_classes() -> [AllocClass; NUM_CLASSES] {
    [
        AllocClass { kind: ClassKind::Kernel, start: KERNEL_SPACE_START, end: KERNEL_SPACE_END, align: FRAME_SIZE as u32, flags: PAGE_PRESENT | PAGE_WRITABLE, cursor: KERNEL_SPACE_START, wrapped_once: false },
        AllocClass { kind: ClassKind::User, start: USER_SPACE_START, end: USER_SPACE_END, align: FRAME_SIZE as u32, flags: PAGE_PRESENT | PAGE_WRITABLE | PAGE_USER, cursor: USER_SPACE_START, wrapped_once: false },
        AllocClass { kind: ClassKind::Mmio, start: MMIO_START, end: MMIO_END, align: FRAME_SIZE as u32, flags: PAGE_PRESENT | PAGE_WRITABLE, cursor: MMIO_START, wrapped_once: false },
        AllocClass { kind: ClassKind::Dma, start: DMA_START, end: DMA_END, align: 64 * 1024, flags: PAGE_PRESENT | PAGE_WRITABLE, cursor: DMA_START, wrapped_once: false },
        AllocClass { kind: ClassKind::Stack, start: STACK_REGION_START, end: STACK_REGION_END, align: FRAME_SIZE as u32, flags: PAGE_PRESENT | PAGE_WRITABLE, cursor: STACK_REGION_START, wrapped_once: false },
    ]
}

/// A single address-space descriptor: one page directory plus its
/// allocation-class bump cursors.
pub struct AddressSpace {
    pub directory: PhysAddr,
    next_free_va: u32,
    classes: [AllocClass; NUM_CLASSES],
}

/// Handle into the global region arena. Stable for the region's lifetime;
/// never reused while the region is alive (see [`create`]/[`destroy`]).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AddressSpaceId(pub u32);

/// Upper bound on concurrently live address spaces (the kernel's own plus
/// every user process). Fixed-size so the arena never touches the global
/// allocator — `virtual_mem::init` runs before the heap exists.
const MAX_REGIONS: usize = 64;
const EMPTY_REGION: Option<AddressSpace> = None;

struct RegionArena {
    regions: [Option<AddressSpace>; MAX_REGIONS],
}

static REGIONS: Spinlock<RegionArena> = Spinlock::new(RegionArena { regions: [EMPTY_REGION; MAX_REGIONS] });
static KERNEL_REGION: Spinlock<Option<AddressSpaceId>> = Spinlock::new(None);

/// Builds the kernel's own address space at boot. Must run after
/// [`physical::init`] and before interrupts or the scheduler come online.
///
/// Because paging is not yet enabled when this runs, the directory and its
/// page tables are still plain physical memory — the recursive window only
/// becomes meaningful once `write_cr3` below turns paging on.
pub fn init() {
    let dir_phys = physical::alloc_frame().expect("VMM: no frame for kernel directory");
    unsafe { core::ptr::write_bytes(dir_phys.as_u32() as *mut u8, 0, FRAME_SIZE) };
    install_self_reference(dir_phys);

    // Identity-map the first IDENTITY_MAP_BYTES so the kernel image, the
    // early pool, and the PMM descriptor array stay reachable once paging
    // is live, and mirror the same frames at the higher-half KERNEL base.
    let pages = IDENTITY_MAP_BYTES / FRAME_SIZE as u32;
    for i in 0..pages {
        let pa = PhysAddr::new(i * FRAME_SIZE as u32);
        raw_map(dir_phys, VirtAddr::new(pa.as_u32()), pa, PAGE_PRESENT | PAGE_WRITABLE);
        raw_map(dir_phys, VirtAddr::new(KERNEL_SPACE_START + pa.as_u32()), pa, PAGE_PRESENT | PAGE_WRITABLE);
    }

    write_cr3(dir_phys.as_u32());
    enable_paging();

    let mut classes = default_classes();
    classes[0].cursor = KERNEL_SPACE_START + IDENTITY_MAP_BYTES;

    let mut arena = REGIONS.lock();
    let slot = arena
        .regions
        .iter()
        .position(|r| r.is_none())
        .expect("VMM: region arena exhausted during init");
    arena.regions[slot] = Some(AddressSpace {
        directory: dir_phys,
        next_free_va: KERNEL_SPACE_START + IDENTITY_MAP_BYTES,
        classes,
    });
    let id = AddressSpaceId(slot as u32);
    drop(arena);
    *KERNEL_REGION.lock() = Some(id);

    crate::serial_println!(
        "VMM: paging enabled, kernel directory at {:#010x}, identity map {} MiB",
        dir_phys.as_u32(),
        IDENTITY_MAP_BYTES / (1024 * 1024)
    );
}

#[inline]
fn enable_paging() {
    unsafe {
        asm!(
            "mov {tmp}, cr0",
            "or {tmp}, 0x80000000",
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            options(nostack, preserves_flags)
        );
    }
}

/// Writes a single PDE/PTE pair directly into a physical directory frame,
/// for use only before paging is enabled (boot) or when constructing a
/// brand new directory that isn't loaded into CR3 yet. Allocates a page
/// table frame if the covering PDE is absent.
fn raw_map(dir_phys: PhysAddr, va: VirtAddr, pa: PhysAddr, flags: u32) {
    let pdi = va.page_directory_index();
    let pti = va.page_table_index();
    let pde_addr = (dir_phys.as_u32() as usize + pdi * 4) as *mut u32;
    let mut pde = unsafe { *pde_addr };
    if pde & PAGE_PRESENT == 0 {
        let table = physical::alloc_frame().expect("VMM: no frame for page table (raw_map)");
        unsafe { core::ptr::write_bytes(table.as_u32() as *mut u8, 0, FRAME_SIZE) };
        pde = table.as_u32() | PAGE_PRESENT | PAGE_WRITABLE | PAGE_USER;
        unsafe { *pde_addr = pde };
    }
    let table_phys = pde & !0xFFF;
    let pte_addr = (table_phys as usize + pti * 4) as *mut u32;
    unsafe { *pte_addr = pa.as_u32() | flags | PAGE_PRESENT };
}

fn install_self_reference(dir_phys: PhysAddr) {
    let pde_addr = (dir_phys.as_u32() as usize + RECURSIVE_INDEX * 4) as *mut u32;
    unsafe { *pde_addr = dir_phys.as_u32() | PAGE_PRESENT | PAGE_WRITABLE };
}

pub fn kernel_region() -> AddressSpaceId {
    KERNEL_REGION.lock().expect("VMM not initialized")
}

/// Runs `f` with `id`'s directory loaded into the paging root register,
/// restoring whatever was loaded before if it had to switch. Interrupts are
/// masked for the duration so a preemption can never observe a foreign
/// directory loaded on this CPU.
fn with_active<T>(id: AddressSpaceId, f: impl FnOnce() -> T) -> T {
    let saved = crate::sync::spinlock::push_noint();
    let target = {
        let arena = REGIONS.lock();
        arena.regions[id.0 as usize]
            .as_ref()
            .expect("VMM: use of destroyed region")
            .directory
    };
    let previous = read_cr3();
    let switched = previous != target.as_u32();
    if switched {
        write_cr3(target.as_u32());
    }
    let result = f();
    if switched {
        write_cr3(previous);
    }
    crate::sync::spinlock::pop_noint(saved);
    result
}

/// Creates a fresh, empty address space with its own page directory and
/// default allocation classes. Registers it in the global region list.
pub fn create() -> Result<AddressSpaceId> {
    let dir_phys = physical::alloc_frame().ok_or(KernelError::OutOfMemory)?;

    // Nothing else references this frame yet, so it's safe to zero and seed
    // its self-reference directly through its physical address rather than
    // switching CR3 to it.
    unsafe { core::ptr::write_bytes(dir_phys.as_u32() as *mut u8, 0, FRAME_SIZE) };
    install_self_reference(dir_phys);

    let mut arena = REGIONS.lock();
    let slot = match arena.regions.iter().position(|r| r.is_none()) {
        Some(s) => s,
        None => {
            drop(arena);
            physical::free_frame(dir_phys);
            return Err(KernelError::OutOfMemory);
        }
    };
    arena.regions[slot] = Some(AddressSpace {
        directory: dir_phys,
        next_free_va: USER_SPACE_START,
        classes: default_classes(),
    });
    Ok(AddressSpaceId(slot as u32))
}

/// Destroys a region: frees every present page-table's data frames, then
/// the table frame itself, then the directory frame. Removes it from the
/// global arena.
pub fn destroy(id: AddressSpaceId) {
    let directory = {
        let arena = REGIONS.lock();
        match &arena.regions[id.0 as usize] {
            Some(r) => r.directory,
            None => return,
        }
    };

    with_active(id, || {
        for pdi in 0..RECURSIVE_INDEX {
            let pde = unsafe { *pde_ptr(pdi) };
            if pde & PAGE_PRESENT == 0 {
                continue;
            }
            for pti in 0..ENTRIES_PER_TABLE {
                let pte = unsafe { *pte_ptr(pdi, pti) };
                if pte & PAGE_PRESENT != 0 {
                    physical::free_frame(PhysAddr::new(pte & !0xFFF));
                }
            }
            physical::free_frame(PhysAddr::new(pde & !0xFFF));
        }
    });

    physical::free_frame(directory);
    REGIONS.lock().regions[id.0 as usize] = None;
}

/// Loads `id`'s directory into the paging root register. Used by the
/// scheduler on every context switch between threads of different processes.
pub fn switch_to(id: AddressSpaceId) {
    let directory = REGIONS.lock().regions[id.0 as usize]
        .as_ref()
        .expect("VMM: switch_to destroyed region")
        .directory;
    write_cr3(directory.as_u32());
}

pub fn directory_of(id: AddressSpaceId) -> PhysAddr {
    REGIONS.lock().regions[id.0 as usize]
        .as_ref()
        .expect("VMM: directory_of destroyed region")
        .directory
}

/// Installs `va -> pa` with `flags` in `id`. Allocates and zeroes a page
/// table frame first if the covering directory entry is absent.
pub fn map(id: AddressSpaceId, va: VirtAddr, pa: PhysAddr, flags: u32) -> Result<()> {
    with_active(id, || {
        let pdi = va.page_directory_index();
        let pti = va.page_table_index();
        let pde_p = pde_ptr(pdi);
        let mut pde = unsafe { *pde_p };
        if pde & PAGE_PRESENT == 0 {
            let table = physical::alloc_frame().ok_or(KernelError::OutOfMemory)?;
            pde = table.as_u32() | PAGE_PRESENT | PAGE_WRITABLE | PAGE_USER;
            unsafe { *pde_p = pde };
            // The table is now reachable through the recursive window;
            // zero it there rather than through its physical address.
            let table_window = (RECURSIVE_BASE + (pdi * FRAME_SIZE) as u32) as *mut u8;
            unsafe { core::ptr::write_bytes(table_window, 0, FRAME_SIZE) };
        }
        let pte_p = pte_ptr(pdi, pti);
        if unsafe { *pte_p } & PAGE_PRESENT != 0 {
            return Err(KernelError::MappingConflict { va });
        }
        unsafe { *pte_p = pa.as_u32() | flags | PAGE_PRESENT };
        invalidate_page(va.as_u32());
        Ok(())
    })
}

/// Clears `va`'s PTE if present. Does not reclaim the (possibly now empty)
/// page-table frame — matching §4.D, tables aren't reclaimed eagerly.
pub fn unmap(id: AddressSpaceId, va: VirtAddr) {
    with_active(id, || {
        let pdi = va.page_directory_index();
        if unsafe { *pde_ptr(pdi) } & PAGE_PRESENT == 0 {
            return;
        }
        let pte_p = pte_ptr(pdi, va.page_table_index());
        unsafe { *pte_p = 0 };
        invalidate_page(va.as_u32());
    });
}

/// Returns the physical address `va` resolves to, or 0 if unmapped.
pub fn resolve(id: AddressSpaceId, va: VirtAddr) -> u32 {
    with_active(id, || {
        let pdi = va.page_directory_index();
        let pde = unsafe { *pde_ptr(pdi) };
        if pde & PAGE_PRESENT == 0 {
            return 0;
        }
        let pte = unsafe { *pte_ptr(pdi, va.page_table_index()) };
        if pte & PAGE_PRESENT == 0 {
            return 0;
        }
        (pte & !0xFFF) | va.page_offset() as u32
    })
}

/// Rewrites `va`'s flags, preserving its physical frame bits. No-op if `va`
/// is unmapped.
pub fn protect(id: AddressSpaceId, va: VirtAddr, flags: u32) {
    with_active(id, || {
        let pdi = va.page_directory_index();
        if unsafe { *pde_ptr(pdi) } & PAGE_PRESENT == 0 {
            return;
        }
        let pte_p = pte_ptr(pdi, va.page_table_index());
        let pte = unsafe { *pte_p };
        if pte & PAGE_PRESENT == 0 {
            return;
        }
        let frame = pte & !0xFFF;
        unsafe { *pte_p = frame | flags | PAGE_PRESENT };
        invalidate_page(va.as_u32());
    });
}

pub fn map_range(id: AddressSpaceId, va: VirtAddr, pa: PhysAddr, pages: u32, flags: u32) -> Result<()> {
    for i in 0..pages {
        let off = i * FRAME_SIZE as u32;
        if let Err(e) = map(id, VirtAddr::new(va.as_u32() + off), PhysAddr::new(pa.as_u32() + off), flags) {
            for j in 0..i {
                unmap(id, VirtAddr::new(va.as_u32() + j * FRAME_SIZE as u32));
            }
            return Err(e);
        }
    }
    Ok(())
}

pub fn unmap_range(id: AddressSpaceId, va: VirtAddr, pages: u32) {
    for i in 0..pages {
        unmap(id, VirtAddr::new(va.as_u32() + i * FRAME_SIZE as u32));
    }
}

pub fn is_range_mapped(id: AddressSpaceId, va: VirtAddr, pages: u32) -> bool {
    (0..pages).all(|i| resolve(id, VirtAddr::new(va.as_u32() + i * FRAME_SIZE as u32)) != 0)
}

pub fn protect_range(id: AddressSpaceId, va: VirtAddr, pages: u32, flags: u32) {
    for i in 0..pages {
        protect(id, VirtAddr::new(va.as_u32() + i * FRAME_SIZE as u32), flags);
    }
}

/// Class-agnostic sequential allocation: grabs `pages` fresh frames and maps
/// them starting at the region's bump cursor, rolling back on partial
/// failure. Used for generic kernel-owned buffers that don't belong to one
/// of the named classes.
pub fn alloc(id: AddressSpaceId, pages: u32, flags: u32) -> Result<VirtAddr> {
    let base = {
        let arena = REGIONS.lock();
        arena.regions[id.0 as usize].as_ref().unwrap().next_free_va
    };
    let mut mapped = 0u32;
    for i in 0..pages {
        let va = VirtAddr::new(base + i * FRAME_SIZE as u32);
        let pa = match physical::alloc_frame() {
            Some(p) => p,
            None => {
                for j in 0..mapped {
                    unmap(id, VirtAddr::new(base + j * FRAME_SIZE as u32));
                }
                return Err(KernelError::OutOfMemory);
            }
        };
        if let Err(e) = map(id, va, pa, flags) {
            physical::free_frame(pa);
            for j in 0..mapped {
                unmap(id, VirtAddr::new(base + j * FRAME_SIZE as u32));
            }
            return Err(e);
        }
        mapped += 1;
    }
    let mut arena = REGIONS.lock();
    arena.regions[id.0 as usize].as_mut().unwrap().next_free_va = base + pages * FRAME_SIZE as u32;
    Ok(VirtAddr::new(base))
}

/// Allocates `pages` frames from the named class's bump cursor, scanning
/// forward (wrapping once) for a run of `pages` unmapped, validator-passing
/// pages.
pub fn class_alloc(id: AddressSpaceId, kind: ClassKind, pages: u32) -> Result<VirtAddr> {
    if pages == 0 {
        return Err(KernelError::InvalidArgument("class_alloc: zero pages"));
    }
    let run_bytes = pages * FRAME_SIZE as u32;

    loop {
        let (mut candidate, class_end, align) = {
            let arena = REGIONS.lock();
            let region = arena.regions[id.0 as usize].as_ref().unwrap();
            let class = region.classes.iter().find(|c| c.kind == kind).unwrap();
            (class.cursor, class.end, class.align)
        };
        candidate = align_up(candidate, align);

        if candidate + run_bytes > class_end {
            let mut arena = REGIONS.lock();
            let class = arena.regions[id.0 as usize].as_mut().unwrap()
                .classes.iter_mut().find(|c| c.kind == kind).unwrap();
            if class.wrapped_once {
                return Err(KernelError::OutOfMemory);
            }
            class.wrapped_once = true;
            class.cursor = class.start;
            continue;
        }

        let valid = {
            let arena = REGIONS.lock();
            let class = arena.regions[id.0 as usize].as_ref().unwrap()
                .classes.iter().find(|c| c.kind == kind).unwrap();
            class.validate(candidate, pages)
        };
        if !valid {
            advance_cursor(id, kind, align);
            continue;
        }

        if probe_any_mapped(id, candidate, pages) {
            advance_cursor(id, kind, FRAME_SIZE as u32);
            continue;
        }

        let flags = {
            let arena = REGIONS.lock();
            arena.regions[id.0 as usize].as_ref().unwrap()
                .classes.iter().find(|c| c.kind == kind).unwrap().flags
        };

        let mut mapped = 0u32;
        for i in 0..pages {
            let va = VirtAddr::new(candidate + i * FRAME_SIZE as u32);
            let pa = match physical::alloc_frame() {
                Some(p) => p,
                None => {
                    for j in 0..mapped {
                        unmap(id, VirtAddr::new(candidate + j * FRAME_SIZE as u32));
                    }
                    return Err(KernelError::OutOfMemory);
                }
            };
            if let Err(e) = map(id, va, pa, flags) {
                physical::free_frame(pa);
                for j in 0..mapped {
                    unmap(id, VirtAddr::new(candidate + j * FRAME_SIZE as u32));
                }
                return Err(e);
            }
            mapped += 1;
        }

        let mut arena = REGIONS.lock();
        let class = arena.regions[id.0 as usize].as_mut().unwrap()
            .classes.iter_mut().find(|c| c.kind == kind).unwrap();
        class.cursor = candidate + run_bytes;
        return Ok(VirtAddr::new(candidate));
    }
}

fn probe_any_mapped(id: AddressSpaceId, start: u32, pages: u32) -> bool {
    (0..pages).any(|i| resolve(id, VirtAddr::new(start + i * FRAME_SIZE as u32)) != 0)
}

fn advance_cursor(id: AddressSpaceId, kind: ClassKind, by: u32) {
    let mut arena = REGIONS.lock();
    let class = arena.regions[id.0 as usize].as_mut().unwrap()
        .classes.iter_mut().find(|c| c.kind == kind).unwrap();
    class.cursor += by;
}

fn align_up(v: u32, align: u32) -> u32 {
    (v + align - 1) & !(align - 1)
}

/// Reserves a run of `pages` virtual addresses from a class's cursor without
/// mapping anything, used by [`carve_stack`] to leave guard pages untouched.
fn class_reserve_only(id: AddressSpaceId, kind: ClassKind, pages: u32) -> Result<VirtAddr> {
    let run_bytes = pages * FRAME_SIZE as u32;
    loop {
        let (candidate, class_end, align) = {
            let arena = REGIONS.lock();
            let class = arena.regions[id.0 as usize].as_ref().unwrap()
                .classes.iter().find(|c| c.kind == kind).unwrap();
            (align_up(class.cursor, class.align), class.end, class.align)
        };
        if candidate + run_bytes > class_end {
            let mut arena = REGIONS.lock();
            let class = arena.regions[id.0 as usize].as_mut().unwrap()
                .classes.iter_mut().find(|c| c.kind == kind).unwrap();
            if class.wrapped_once {
                return Err(KernelError::OutOfMemory);
            }
            class.wrapped_once = true;
            class.cursor = class.start;
            continue;
        }
        if probe_any_mapped(id, candidate, pages) {
            advance_cursor(id, kind, align);
            continue;
        }
        let mut arena = REGIONS.lock();
        let class = arena.regions[id.0 as usize].as_mut().unwrap()
            .classes.iter_mut().find(|c| c.kind == kind).unwrap();
        class.cursor = candidate + run_bytes;
        return Ok(VirtAddr::new(candidate));
    }
}

/// Reserves `pages + 2` virtual pages for a kernel or user stack, mapping
/// only the middle `pages` frames and leaving the top and bottom page
/// unmapped as guards. Returns the top of the usable (mapped) region.
pub fn carve_stack(id: AddressSpaceId, pages: u32, user: bool) -> Result<VirtAddr> {
    let total = pages + 2;
    let base = class_reserve_only(id, ClassKind::Stack, total)?;
    let flags = PAGE_PRESENT | PAGE_WRITABLE | if user { PAGE_USER } else { 0 };
    let data_start = base.as_u32() + FRAME_SIZE as u32;

    let mut mapped = 0u32;
    for i in 0..pages {
        let va = VirtAddr::new(data_start + i * FRAME_SIZE as u32);
        let pa = match physical::alloc_frame() {
            Some(p) => p,
            None => {
                for j in 0..mapped {
                    unmap(id, VirtAddr::new(data_start + j * FRAME_SIZE as u32));
                }
                return Err(KernelError::OutOfMemory);
            }
        };
        if let Err(e) = map(id, va, pa, flags) {
            physical::free_frame(pa);
            for j in 0..mapped {
                unmap(id, VirtAddr::new(data_start + j * FRAME_SIZE as u32));
            }
            return Err(e);
        }
        mapped += 1;
    }
    Ok(VirtAddr::new(data_start + pages * FRAME_SIZE as u32))
}

/// Identity-maps `[pa, pa+pages*PAGE)` at the same virtual address. Used
/// only for low-memory MMIO regions that happen to coincide with their
/// physical address (e.g. legacy VGA/BIOS windows).
pub fn identity_map(id: AddressSpaceId, pa: PhysAddr, pages: u32, flags: u32) -> Result<()> {
    map_range(id, VirtAddr::new(pa.as_u32()), pa, pages, flags)
}

/// Maps a caller-supplied physical base at a fresh VA carved from the MMIO
/// class, preserving the base's page offset in the returned VA.
pub fn mmio_map(id: AddressSpaceId, phys_base: PhysAddr, size: u32, flags: u32) -> Result<VirtAddr> {
    let aligned_base = phys_base.frame_align_down();
    let offset = phys_base.as_u32() - aligned_base.as_u32();
    let pages = (offset + size + FRAME_SIZE as u32 - 1) / FRAME_SIZE as u32;
    let base = class_reserve_only(id, ClassKind::Mmio, pages)?;
    for i in 0..pages {
        let va = VirtAddr::new(base.as_u32() + i * FRAME_SIZE as u32);
        let pa = PhysAddr::new(aligned_base.as_u32() + i * FRAME_SIZE as u32);
        if let Err(e) = map(id, va, pa, flags) {
            for j in 0..i {
                unmap(id, VirtAddr::new(base.as_u32() + j * FRAME_SIZE as u32));
            }
            return Err(e);
        }
    }
    Ok(VirtAddr::new(base.as_u32() + offset))
}

/// Maps a caller-supplied, possibly non-contiguous, list of physical frames
/// into a fresh run of virtual addresses from the MMIO class (used for
/// scatter-gather buffers and DMA ring descriptors).
pub fn scatter_map(id: AddressSpaceId, frames: &[PhysAddr], flags: u32) -> Result<VirtAddr> {
    let pages = frames.len() as u32;
    let base = class_reserve_only(id, ClassKind::Mmio, pages)?;
    for (i, pa) in frames.iter().enumerate() {
        let va = VirtAddr::new(base.as_u32() + i as u32 * FRAME_SIZE as u32);
        if let Err(e) = map(id, va, *pa, flags) {
            for j in 0..i {
                unmap(id, VirtAddr::new(base.as_u32() + j as u32 * FRAME_SIZE as u32));
            }
            return Err(e);
        }
    }
    Ok(base)
}

/// Maps the same physical frames backing `[va, va+pages*PAGE)` in `src` into
/// a fresh VA range in `dst` (both regions now share the underlying frames —
/// writes through either are visible to the other).
pub fn map_shared(src: AddressSpaceId, dst: AddressSpaceId, va: VirtAddr, pages: u32, flags: u32) -> Result<VirtAddr> {
    let mut frames = Vec::with_capacity(pages as usize);
    for i in 0..pages {
        let resolved = resolve(src, VirtAddr::new(va.as_u32() + i * FRAME_SIZE as u32));
        if resolved == 0 {
            return Err(KernelError::InvalidArgument("map_shared: source range not fully mapped"));
        }
        frames.push(PhysAddr::new(resolved & !0xFFF));
    }
    scatter_map(dst, &frames, flags)
}

/// Allocates a fresh frame in `id`, copies `va`'s contents into it, and maps
/// the copy at a new class-allocated VA. Used by the heap's guarded
/// allocation variant and by callers that need an independent copy of a
/// single page without tearing down the original.
pub fn duplicate_page(id: AddressSpaceId, va: VirtAddr) -> Result<VirtAddr> {
    let src_pa = resolve(id, va);
    if src_pa == 0 {
        return Err(KernelError::InvalidArgument("duplicate_page: source unmapped"));
    }
    let new_va = class_alloc(id, ClassKind::Kernel, 1)?;
    let new_pa = resolve(id, new_va);
    unsafe {
        core::ptr::copy_nonoverlapping(
            (src_pa & !0xFFF) as *const u8,
            (new_pa & !0xFFF) as *mut u8,
            FRAME_SIZE,
        );
    }
    Ok(new_va)
}

/// Eagerly copies an entire address space: for every present PDE in `src`,
/// allocates a destination table frame; for every present PTE, allocates a
/// destination data frame and copies its contents, installing the PTE with
/// the source's flags. This kernel has no copy-on-write yet, so fork is
/// always a full physical copy.
pub fn fork(src: AddressSpaceId) -> Result<AddressSpaceId> {
    let dst = create()?;

    let mut entries: Vec<(usize, usize, u32)> = Vec::new();
    with_active(src, || {
        for pdi in 0..RECURSIVE_INDEX {
            let pde = unsafe { *pde_ptr(pdi) };
            if pde & PAGE_PRESENT == 0 {
                continue;
            }
            for pti in 0..ENTRIES_PER_TABLE {
                let pte = unsafe { *pte_ptr(pdi, pti) };
                if pte & PAGE_PRESENT != 0 {
                    entries.push((pdi, pti, pte));
                }
            }
        }
    });

    for (pdi, pti, pte) in entries {
        let src_pa = pte & !0xFFF;
        let flags = pte & 0xFFF;
        let va = VirtAddr::new(((pdi as u32) << 22) | ((pti as u32) << 12));

        let dst_pa = match physical::alloc_frame() {
            Some(p) => p,
            None => {
                destroy(dst);
                return Err(KernelError::OutOfMemory);
            }
        };
        with_active(src, || unsafe {
            core::ptr::copy_nonoverlapping(src_pa as *const u8, dst_pa.as_u32() as *mut u8, FRAME_SIZE);
        });
        if let Err(e) = map(dst, va, dst_pa, flags) {
            physical::free_frame(dst_pa);
            destroy(dst);
            return Err(e);
        }
    }

    let src_next = REGIONS.lock().regions[src.0 as usize].as_ref().unwrap().next_free_va;
    REGIONS.lock().regions[dst.0 as usize].as_mut().unwrap().next_free_va = src_next;

    Ok(dst)
}

/// Flushes the TLB entry for a single page. Exposed for callers that edit a
/// PTE through some other route and need to invalidate it themselves.
pub fn flush_tlb_page(va: VirtAddr) {
    invalidate_page(va.as_u32());
}

/// Frees `pages` pages previously returned by [`alloc`] or [`class_alloc`]:
/// unmaps each page and returns its backing frame to the PMM.
pub fn free_pages(id: AddressSpaceId, va: VirtAddr, pages: u32) {
    for i in 0..pages {
        let page_va = VirtAddr::new(va.as_u32() + i * FRAME_SIZE as u32);
        let pa = resolve(id, page_va);
        if pa != 0 {
            unmap(id, page_va);
            physical::free_frame(PhysAddr::new(pa & !0xFFF));
        }
    }
}

/// Allocates `data_pages` pages backed by frames, plus one trailing unmapped
/// guard page. Returns the base of the mapped data region; the guard page
/// immediately follows it and will fault on any access past the end.
pub fn alloc_guarded(id: AddressSpaceId, data_pages: u32) -> Result<VirtAddr> {
    let total = data_pages + 1;
    let base = class_reserve_only(id, ClassKind::Kernel, total)?;
    let flags = PAGE_PRESENT | PAGE_WRITABLE;
    let mut mapped = 0u32;
    for i in 0..data_pages {
        let va = VirtAddr::new(base.as_u32() + i * FRAME_SIZE as u32);
        let pa = match physical::alloc_frame() {
            Some(p) => p,
            None => {
                for j in 0..mapped {
                    unmap(id, VirtAddr::new(base.as_u32() + j * FRAME_SIZE as u32));
                }
                return Err(KernelError::OutOfMemory);
            }
        };
        if let Err(e) = map(id, va, pa, flags) {
            physical::free_frame(pa);
            for j in 0..mapped {
                unmap(id, VirtAddr::new(base.as_u32() + j * FRAME_SIZE as u32));
            }
            return Err(e);
        }
        mapped += 1;
    }
    Ok(base)
}

/// Frees a region returned by [`alloc_guarded`]. The guard page was never
/// mapped, so only `data_pages` need reclaiming.
pub fn free_guarded(id: AddressSpaceId, base: VirtAddr, data_pages: u32) {
    free_pages(id, base, data_pages);
}
