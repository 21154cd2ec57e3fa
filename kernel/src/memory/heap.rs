//! Kernel heap: page-sized "boxes" carved into 32-byte blocks.
//!
//! A box is one frame laid out as `{header, bitmap, 127 x 32-byte blocks}` —
//! the header and bitmap together take exactly one block's worth of space,
//! so `BLOCKS_PER_BOX` comes out to 127 rather than a round number. Boxes
//! form a singly linked list (`BoxHeader::next`, by virtual address) and are
//! indexed by a fixed 256-slot hash table keyed by a monotonically
//! increasing box id — not the box's address — using Knuth multiplicative
//! hashing with a bounded linear probe, matching the turnstile hash table's
//! shape ([`crate::sync::turnstile`]) rather than something bespoke.
//!
//! Every allocation, small or large, carries an 8-byte header immediately
//! before the returned pointer: `{box_id, size}`. `box_id == 0` marks a
//! direct large allocation (one or more whole frames, no box involved);
//! `box_id == u32::MAX` marks a guarded allocation (frames plus a trailing
//! unmapped page). Anything else is a real box id, looked up in the hash
//! table to find which box's bitmap to clear.
//!
//! Lock hierarchy: the global box-list lock is always acquired before a
//! box's own lock, never the reverse.

use crate::memory::address::VirtAddr;
use crate::memory::virtual_mem;
use crate::memory::FRAME_SIZE;
use crate::sync::spinlock::Spinlock;
use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

const BLOCK_SIZE: usize = 32;
const BLOCKS_PER_BOX: usize = 127;
const BOX_HEADER_SIZE: usize = 16;
const BOX_BITMAP_SIZE: usize = 16;
const BOX_DATA_OFFSET: u32 = (BOX_HEADER_SIZE + BOX_BITMAP_SIZE) as u32;
const ALLOC_HEADER_SIZE: usize = 8;

const BOX_HASH_SIZE: usize = 256;
const HASH_EMPTY: u32 = 0;
const HASH_TOMBSTONE: u32 = u32::MAX;

const LARGE_MARKER: u32 = 0;
const GUARD_MARKER: u32 = u32::MAX;

#[repr(C)]
struct BoxHeader {
    id: u32,
    next: u32,
    lock: AtomicU32,
    in_use: u32,
}

#[repr(C)]
struct AllocHeader {
    box_id: u32,
    size: u32,
}

#[derive(Clone, Copy)]
struct HashSlot {
    id: u32,
    va: u32,
}

struct HeapState {
    box_list_head: u32,
    hash: [HashSlot; BOX_HASH_SIZE],
    next_box_id: u32,
}

static HEAP: Spinlock<HeapState> = Spinlock::new(HeapState {
    box_list_head: 0,
    hash: [HashSlot { id: 0, va: 0 }; BOX_HASH_SIZE],
    next_box_id: 1,
});

static INITIALIZED: AtomicBool = AtomicBool::new(false);

fn box_header(va: u32) -> &'static mut BoxHeader {
    unsafe { &mut *(va as *mut BoxHeader) }
}

fn box_bitmap(va: u32) -> &'static mut [u8; BOX_BITMAP_SIZE] {
    unsafe { &mut *((va + BOX_HEADER_SIZE as u32) as *mut [u8; BOX_BITMAP_SIZE]) }
}

fn box_data_base(va: u32) -> u32 {
    va + BOX_DATA_OFFSET
}

fn bitmap_range_free(bm: &[u8; BOX_BITMAP_SIZE], start: usize, len: usize) -> bool {
    (start..start + len).all(|k| bm[k / 8] & (1 << (k % 8)) == 0)
}

fn bitmap_set_range(bm: &mut [u8; BOX_BITMAP_SIZE], start: usize, len: usize) {
    for k in start..start + len {
        bm[k / 8] |= 1 << (k % 8);
    }
}

fn bitmap_clear_range(bm: &mut [u8; BOX_BITMAP_SIZE], start: usize, len: usize) {
    for k in start..start + len {
        bm[k / 8] &= !(1 << (k % 8));
    }
}

fn bitmap_is_empty(bm: &[u8; BOX_BITMAP_SIZE]) -> bool {
    bm.iter().all(|&b| b == 0)
}

fn find_free_run(bm: &[u8; BOX_BITMAP_SIZE], blocks_needed: usize) -> Option<usize> {
    if blocks_needed > BLOCKS_PER_BOX {
        return None;
    }
    (0..=BLOCKS_PER_BOX - blocks_needed).find(|&start| bitmap_range_free(bm, start, blocks_needed))
}

/// Knuth multiplicative hash folded down to an 8-bit index (`BOX_HASH_SIZE == 256`).
fn hash_index(id: u32) -> usize {
    (id.wrapping_mul(2654435761u32) >> 24) as usize
}

fn insert_hash(state: &mut HeapState, id: u32, va: u32) -> bool {
    let start = hash_index(id);
    for i in 0..BOX_HASH_SIZE {
        let idx = (start + i) % BOX_HASH_SIZE;
        let slot = &mut state.hash[idx];
        if slot.id == HASH_EMPTY || slot.id == HASH_TOMBSTONE {
            slot.id = id;
            slot.va = va;
            return true;
        }
    }
    false
}

fn lookup_hash(state: &HeapState, id: u32) -> Option<u32> {
    let start = hash_index(id);
    for i in 0..BOX_HASH_SIZE {
        let idx = (start + i) % BOX_HASH_SIZE;
        let slot = &state.hash[idx];
        if slot.id == HASH_EMPTY {
            return None;
        }
        if slot.id == id {
            return Some(slot.va);
        }
    }
    None
}

fn remove_hash(state: &mut HeapState, id: u32) {
    let start = hash_index(id);
    for i in 0..BOX_HASH_SIZE {
        let idx = (start + i) % BOX_HASH_SIZE;
        let slot = &mut state.hash[idx];
        if slot.id == HASH_EMPTY {
            return;
        }
        if slot.id == id {
            slot.id = HASH_TOMBSTONE;
            slot.va = 0;
            return;
        }
    }
}

fn unlink_box(state: &mut HeapState, box_va: u32) {
    if state.box_list_head == box_va {
        state.box_list_head = box_header(box_va).next;
        return;
    }
    let mut cur = state.box_list_head;
    while cur != 0 {
        let next = box_header(cur).next;
        if next == box_va {
            box_header(cur).next = box_header(box_va).next;
            return;
        }
        cur = next;
    }
}

/// Takes `blocks_needed` contiguous blocks from `va`'s bitmap under the
/// box's own lock, returning the starting block index on success.
fn find_and_take(va: u32, blocks_needed: usize) -> Option<usize> {
    let header = box_header(va);
    while header
        .lock
        .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        core::hint::spin_loop();
    }
    let bitmap = box_bitmap(va);
    let found = find_free_run(bitmap, blocks_needed);
    if let Some(start) = found {
        bitmap_set_range(bitmap, start, blocks_needed);
        header.in_use += blocks_needed as u32;
    }
    header.lock.store(0, Ordering::Release);
    found
}

fn write_alloc_header(block_va: u32, box_id: u32, size: usize) -> *mut u8 {
    unsafe {
        let hdr = block_va as *mut AllocHeader;
        (*hdr).box_id = box_id;
        (*hdr).size = size as u32;
    }
    (block_va + ALLOC_HEADER_SIZE as u32) as *mut u8
}

fn alloc_small(size: usize, total: usize) -> *mut u8 {
    let blocks_needed = (total + BLOCK_SIZE - 1) / BLOCK_SIZE;
    if blocks_needed == 0 || blocks_needed > BLOCKS_PER_BOX {
        return core::ptr::null_mut();
    }

    let mut state = HEAP.lock();
    let mut cur = state.box_list_head;
    while cur != 0 {
        let box_id = box_header(cur).id;
        let next = box_header(cur).next;
        if let Some(start) = find_and_take(cur, blocks_needed) {
            let block_va = box_data_base(cur) + (start * BLOCK_SIZE) as u32;
            return write_alloc_header(block_va, box_id, size);
        }
        cur = next;
    }

    // No existing box had room; carve a fresh one and retry there.
    let id = state.next_box_id;
    state.next_box_id = if id == HASH_TOMBSTONE - 1 { 1 } else { id + 1 };

    let flags = virtual_mem::PAGE_PRESENT | virtual_mem::PAGE_WRITABLE;
    let va = match virtual_mem::alloc(virtual_mem::kernel_region(), 1, flags) {
        Ok(v) => v.as_u32(),
        Err(_) => return core::ptr::null_mut(),
    };
    unsafe { core::ptr::write_bytes(va as *mut u8, 0, FRAME_SIZE) };
    {
        let h = box_header(va);
        h.id = id;
        h.next = state.box_list_head;
    }
    insert_hash(&mut state, id, va);
    state.box_list_head = va;
    drop(state);

    match find_and_take(va, blocks_needed) {
        Some(start) => {
            let block_va = box_data_base(va) + (start * BLOCK_SIZE) as u32;
            write_alloc_header(block_va, id, size)
        }
        None => core::ptr::null_mut(),
    }
}

fn free_small(block_va: u32, box_id: u32) {
    let mut state = HEAP.lock();
    let box_va = match lookup_hash(&state, box_id) {
        Some(v) => v,
        None => return,
    };

    let hdr = unsafe { &*(block_va as *const AllocHeader) };
    let total = hdr.size as usize + ALLOC_HEADER_SIZE;
    let blocks_needed = (total + BLOCK_SIZE - 1) / BLOCK_SIZE;
    let index = ((block_va - box_data_base(box_va)) / BLOCK_SIZE as u32) as usize;

    let now_empty = {
        let header = box_header(box_va);
        while header
            .lock
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        let bitmap = box_bitmap(box_va);
        bitmap_clear_range(bitmap, index, blocks_needed);
        header.in_use -= blocks_needed as u32;
        let empty = bitmap_is_empty(bitmap);
        header.lock.store(0, Ordering::Release);
        empty
    };

    if now_empty {
        unlink_box(&mut state, box_va);
        remove_hash(&mut state, box_id);
        drop(state);
        virtual_mem::free_pages(virtual_mem::kernel_region(), VirtAddr::new(box_va), 1);
    }
}

fn alloc_large(size: usize, total: usize) -> *mut u8 {
    let pages = ((total + FRAME_SIZE - 1) / FRAME_SIZE) as u32;
    let flags = virtual_mem::PAGE_PRESENT | virtual_mem::PAGE_WRITABLE;
    let va = match virtual_mem::alloc(virtual_mem::kernel_region(), pages, flags) {
        Ok(v) => v.as_u32(),
        Err(_) => return core::ptr::null_mut(),
    };
    write_alloc_header(va, LARGE_MARKER, size)
}

fn free_large(block_va: u32) {
    let hdr = unsafe { &*(block_va as *const AllocHeader) };
    let pages = ((hdr.size as usize + ALLOC_HEADER_SIZE + FRAME_SIZE - 1) / FRAME_SIZE) as u32;
    virtual_mem::free_pages(virtual_mem::kernel_region(), VirtAddr::new(block_va), pages);
}

fn free_guarded(block_va: u32) {
    let hdr = unsafe { &*(block_va as *const AllocHeader) };
    let pages = ((hdr.size as usize + ALLOC_HEADER_SIZE + FRAME_SIZE - 1) / FRAME_SIZE) as u32;
    virtual_mem::free_guarded(virtual_mem::kernel_region(), VirtAddr::new(block_va), pages);
}

fn malloc(size: usize) -> *mut u8 {
    if size == 0 || !INITIALIZED.load(Ordering::Acquire) {
        return core::ptr::null_mut();
    }
    let total = size + ALLOC_HEADER_SIZE;
    if total <= FRAME_SIZE {
        let p = alloc_small(size, total);
        if !p.is_null() {
            return p;
        }
    }
    alloc_large(size, total)
}

fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let block_va = ptr as u32 - ALLOC_HEADER_SIZE as u32;
    let box_id = unsafe { (*(block_va as *const AllocHeader)).box_id };
    match box_id {
        LARGE_MARKER => free_large(block_va),
        GUARD_MARKER => free_guarded(block_va),
        _ => free_small(block_va, box_id),
    }
}

/// Allocates `size` bytes with a trailing unmapped guard page, for stress
/// tests that deliberately write past the end of a buffer to confirm the
/// VMM and heap catch it. Free with [`free_guarded_alloc`], not the global
/// allocator.
pub fn alloc_guarded(size: usize) -> *mut u8 {
    if size == 0 || !INITIALIZED.load(Ordering::Acquire) {
        return core::ptr::null_mut();
    }
    let total = size + ALLOC_HEADER_SIZE;
    let pages = ((total + FRAME_SIZE - 1) / FRAME_SIZE) as u32;
    let va = match virtual_mem::alloc_guarded(virtual_mem::kernel_region(), pages) {
        Ok(v) => v.as_u32(),
        Err(_) => return core::ptr::null_mut(),
    };
    write_alloc_header(va, GUARD_MARKER, size)
}

/// Frees a pointer previously returned by [`alloc_guarded`].
pub fn free_guarded_alloc(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let block_va = ptr as u32 - ALLOC_HEADER_SIZE as u32;
    free_guarded(block_va);
}

struct KernelHeap;

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        malloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        free(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = malloc(new_size);
        if !new_ptr.is_null() {
            let block_va = ptr as u32 - ALLOC_HEADER_SIZE as u32;
            let old_size = (*(block_va as *const AllocHeader)).size as usize;
            let copy_size = core::cmp::min(old_size, new_size);
            core::ptr::copy_nonoverlapping(ptr, new_ptr, copy_size);
            free(ptr);
        }
        new_ptr
    }
}

#[cfg_attr(not(test), global_allocator)]
static HEAP_ALLOCATOR: KernelHeap = KernelHeap;

#[cfg_attr(not(test), alloc_error_handler)]
fn alloc_error(layout: Layout) -> ! {
    panic!("heap allocation failed: {} bytes (align {})", layout.size(), layout.align());
}

/// Marks the heap ready for use. Must run after [`virtual_mem::init`] — the
/// heap allocates its boxes and large/guarded regions out of the kernel
/// region's address space, which doesn't exist before then.
pub fn init() {
    INITIALIZED.store(true, Ordering::Release);
    crate::serial_println!(
        "Heap initialized: box-hash allocator ({} blocks/box, {}-byte blocks, {}-slot hash table)",
        BLOCKS_PER_BOX,
        BLOCK_SIZE,
        BOX_HASH_SIZE
    );
}

/// Returns `(boxes, used_blocks, total_blocks)` across the live box list.
/// Large and guarded allocations aren't box-backed and so aren't reflected
/// here.
pub fn heap_stats() -> (usize, usize, usize) {
    let state = HEAP.lock();
    let mut boxes = 0usize;
    let mut used = 0usize;
    let mut cur = state.box_list_head;
    while cur != 0 {
        boxes += 1;
        used += box_header(cur).in_use as usize;
        cur = box_header(cur).next;
    }
    (boxes, used, boxes * BLOCKS_PER_BOX)
}

/// Walks the box list cross-checking each box's recorded `in_use` count
/// against its bitmap's actual popcount. Prints any mismatch to serial.
pub fn validate_heap() {
    let state = HEAP.lock();
    let mut cur = state.box_list_head;
    let mut count = 0usize;
    while cur != 0 {
        let header = box_header(cur);
        let bitmap = box_bitmap(cur);
        let popcount: u32 = bitmap.iter().map(|b| b.count_ones()).sum();
        if popcount != header.in_use {
            crate::serial_println!(
                "HEAP CORRUPT: box {:#010x} (id {}) in_use={} but bitmap popcount={}",
                cur,
                header.id,
                header.in_use,
                popcount
            );
        }
        count += 1;
        cur = header.next;
    }
    crate::serial_println!("  Heap check: {} box(es) walked", count);
}
