//! Global turnstile table binding blocking locks to their waiters and
//! implementing priority inheritance.
//!
//! An open-addressed table of 128 buckets, each guarded by its own
//! [`Spinlock`], holds one lazily-created [`Record`] per distinct lock
//! address currently in use (collisions probe the next bucket). A record is
//! dropped back to empty once it has neither an owner nor waiters, so the
//! table only ever holds entries for locks someone is actually contending.

use crate::sync::spinlock::Spinlock;
use crate::task::scheduler;
use alloc::vec::Vec;

const TABLE_SIZE: usize = 128;
const MAX_CHAIN_DEPTH: usize = 16;

struct Record {
    lock_addr: usize,
    owner: Option<u32>,
    /// Waiting tids, kept sorted by descending effective priority.
    waiters: Vec<u32>,
}

struct Bucket {
    record: Option<Record>,
}

const EMPTY_BUCKET: Spinlock<Bucket> = Spinlock::new(Bucket { record: None });
static TABLE: [Spinlock<Bucket>; TABLE_SIZE] = [EMPTY_BUCKET; TABLE_SIZE];

fn hash(addr: usize) -> usize {
    (addr >> 3) & (TABLE_SIZE - 1)
}

/// Re-sort `waiters` by current effective priority, descending, stable on ties
/// (so the earliest-inserted waiter among equals stays first).
fn resort(waiters: &mut Vec<u32>) {
    waiters.sort_by(|&a, &b| scheduler::effective_of(b).cmp(&scheduler::effective_of(a)));
}

/// Record that `owner` now holds the lock at `lock_addr`. Creates the
/// record if this is the first time the lock has been contended.
pub fn set_owner(lock_addr: usize, owner: u32) {
    for i in 0..TABLE_SIZE {
        let idx = (hash(lock_addr) + i) % TABLE_SIZE;
        let mut bucket = TABLE[idx].lock();
        match &mut bucket.record {
            Some(r) if r.lock_addr == lock_addr => {
                r.owner = Some(owner);
                return;
            }
            None => {
                bucket.record = Some(Record { lock_addr, owner: Some(owner), waiters: Vec::new() });
                return;
            }
            _ => continue,
        }
    }
}

fn owner_of(lock_addr: usize) -> Option<u32> {
    for i in 0..TABLE_SIZE {
        let idx = (hash(lock_addr) + i) % TABLE_SIZE;
        let bucket = TABLE[idx].lock();
        match &bucket.record {
            Some(r) if r.lock_addr == lock_addr => return r.owner,
            None => return None,
            _ => continue,
        }
    }
    None
}

fn max_waiter_effective(lock_addr: usize) -> Option<u8> {
    for i in 0..TABLE_SIZE {
        let idx = (hash(lock_addr) + i) % TABLE_SIZE;
        let bucket = TABLE[idx].lock();
        match &bucket.record {
            Some(r) if r.lock_addr == lock_addr => {
                return r.waiters.first().map(|&w| scheduler::effective_of(w));
            }
            None => return None,
            _ => continue,
        }
    }
    None
}

/// Walk the donation chain starting at `owner`, raising each link's
/// effective priority to `floor` as long as that actually raises it, and
/// following `blocked_lock_of` to whoever *that* lock's owner is.
fn donate_chain(mut owner: u32, floor: u8) {
    for _ in 0..MAX_CHAIN_DEPTH {
        if scheduler::effective_of(owner) >= floor {
            return;
        }
        scheduler::donate(owner, floor);
        match scheduler::blocked_lock_of(owner) {
            Some(next_lock) => match owner_of(next_lock) {
                Some(next_owner) if next_owner != owner => owner = next_owner,
                _ => return,
            },
            None => return,
        }
    }
}

/// Enroll `waiter` on the turnstile for `lock_addr`, donating its priority
/// up the ownership chain if it outranks the current owner.
pub fn block(lock_addr: usize, waiter: u32) {
    let mut found = false;
    for i in 0..TABLE_SIZE {
        let idx = (hash(lock_addr) + i) % TABLE_SIZE;
        let mut bucket = TABLE[idx].lock();
        match &mut bucket.record {
            Some(r) if r.lock_addr == lock_addr => {
                r.waiters.push(waiter);
                resort(&mut r.waiters);
                found = true;
                break;
            }
            None => {
                bucket.record = Some(Record { lock_addr, owner: None, waiters: alloc::vec![waiter] });
                found = true;
                break;
            }
            _ => continue,
        }
    }
    debug_assert!(found, "turnstile table full");

    scheduler::set_blocked_lock(waiter, Some(lock_addr));
    if let Some(owner) = owner_of(lock_addr) {
        scheduler::set_inheritance_owner(waiter, Some(owner));
        donate_chain(owner, scheduler::effective_of(waiter));
    }
}

/// Unwind `tid`'s donation after it has released a lock: its effective
/// priority drops to its base plus whatever it still owes from a lock it is
/// itself blocked on, and that recomputation propagates upward until the
/// chain stabilizes (no more change, or no further lock to climb).
fn unwind(mut tid: u32) {
    for _ in 0..MAX_CHAIN_DEPTH {
        scheduler::reset_to_base(tid);
        let lock_addr = match scheduler::blocked_lock_of(tid) {
            Some(l) => l,
            None => return,
        };
        if let Some(floor) = max_waiter_effective(lock_addr) {
            scheduler::donate(tid, floor);
        }
        match owner_of(lock_addr) {
            Some(owner) if owner != tid => tid = owner,
            _ => return,
        }
    }
}

/// Release `lock_addr`, currently held by `prev_owner`: pop the
/// highest-priority waiter and make it the new owner (returned to the
/// caller, which transfers the lock to it), or `None` if no one was
/// waiting. Always unwinds `prev_owner`'s donation.
pub fn release(lock_addr: usize, prev_owner: u32) -> Option<u32> {
    let mut new_owner = None;
    for i in 0..TABLE_SIZE {
        let idx = (hash(lock_addr) + i) % TABLE_SIZE;
        let mut bucket = TABLE[idx].lock();
        match &mut bucket.record {
            Some(r) if r.lock_addr == lock_addr => {
                new_owner = if r.waiters.is_empty() { None } else { Some(r.waiters.remove(0)) };
                r.owner = new_owner;
                if new_owner.is_none() && r.waiters.is_empty() {
                    bucket.record = None;
                }
                break;
            }
            None => break,
            _ => continue,
        }
    }

    if let Some(w) = new_owner {
        scheduler::set_blocked_lock(w, None);
        scheduler::set_inheritance_owner(w, None);
    }
    unwind(prev_owner);
    new_owner
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_in_range() {
        assert!(hash(0x1000) < TABLE_SIZE);
        assert_eq!(hash(0x1000), hash(0x1000));
    }
}
