//! Priority accounting: starvation boost and priority changes.

use super::{THREADS, READY};
use crate::task::thread::ThreadState;

/// Ticks a ready thread can wait before its `effective` priority is boosted.
const STARVATION_THRESHOLD: u32 = 50;
/// Amount added to `effective` once a thread crosses the starvation threshold.
const BOOST_AMOUNT: u8 = 10;
/// Ceiling on `effective` priority, matching `Thread::priority.base`'s range.
const MAX_PRIORITY: u8 = 255;

/// Walk the ready queue: age every thread by one tick, and boost any thread
/// that has waited past [`STARVATION_THRESHOLD`] and isn't already capped.
/// Runs under the ready-queue lock so the scan sees a consistent snapshot.
pub(super) fn boost_starved() {
    let ready = READY.lock();
    let mut threads = THREADS.lock();
    for &tid in ready.iter() {
        if let Some(t) = threads.get_mut(tid) {
            t.time_since_last_run += 1;
            if t.time_since_last_run > STARVATION_THRESHOLD && t.priority.effective < MAX_PRIORITY {
                t.priority.effective = t.priority.effective.saturating_add(BOOST_AMOUNT).min(MAX_PRIORITY);
            }
        }
    }
}

/// Set a thread's base priority. Effective priority is raised to match if it
/// had fallen below the new base; a donation already in effect (from
/// turnstile priority inheritance) is never lowered by this call.
pub fn set_priority(tid: u32, base: u8) {
    let mut threads = THREADS.lock();
    if let Some(t) = threads.get_mut(tid) {
        t.priority.base = base;
        if t.priority.effective < base {
            t.priority.effective = base;
        }
    }
}

/// Raise a thread's effective priority to at least `floor`, as used by
/// turnstile donation. Never lowers it.
pub fn donate(tid: u32, floor: u8) {
    let mut threads = THREADS.lock();
    if let Some(t) = threads.get_mut(tid) {
        if t.priority.effective < floor {
            t.priority.effective = floor;
        }
    }
}

/// Reset a thread's effective priority back down to its base, as used when
/// unwinding turnstile donation after the lock it was waiting on is released.
pub fn reset_to_base(tid: u32) {
    let mut threads = THREADS.lock();
    if let Some(t) = threads.get_mut(tid) {
        t.priority.effective = t.priority.base;
    }
}

pub fn effective_of(tid: u32) -> u8 {
    THREADS.lock().get(tid).map(|t| t.priority.effective).unwrap_or(0)
}

pub(super) fn state_matches(tid: u32, state: ThreadState) -> bool {
    THREADS.lock().get(tid).map(|t| t.state == state).unwrap_or(false)
}

/// Address of the lock `tid` is currently blocked on, if any. Read by the
/// turnstile table when unwinding a donation chain.
pub fn blocked_lock_of(tid: u32) -> Option<usize> {
    THREADS.lock().get(tid).and_then(|t| t.blocked_lock)
}

/// Record (or clear) the lock address `tid` is blocked on.
pub fn set_blocked_lock(tid: u32, lock_addr: Option<usize>) {
    let mut threads = THREADS.lock();
    if let Some(t) = threads.get_mut(tid) {
        t.blocked_lock = lock_addr;
    }
}

/// Thread whose effective priority `tid`'s presence on a turnstile waiter
/// chain is currently donating to, if any.
pub fn inheritance_owner_of(tid: u32) -> Option<u32> {
    THREADS.lock().get(tid).and_then(|t| t.priority_inheritance_owner)
}

/// Record (or clear) the owner `tid` is currently donating its priority to.
pub fn set_inheritance_owner(tid: u32, owner: Option<u32>) {
    let mut threads = THREADS.lock();
    if let Some(t) = threads.get_mut(tid) {
        t.priority_inheritance_owner = owner;
    }
}
