//! Pushlock: a two-bit-state blocking lock owned by a *process* rather than
//! a thread.
//!
//! Bit 0 (`LOCKED`) is the fast-path CAS target; bit 1 (`WAITERS`) is set the
//! first time a caller has to block and stays set until the wait queue
//! actually drains, so `unlock` always knows whether it's worth taking the
//! slow path of waking someone. Unlike [`crate::sync::mutex::Mutex`], unlock
//! does not transfer ownership to the waiter it wakes — it clears `LOCKED`
//! and lets the woken thread re-race the fast path like anyone else.

use crate::sync::spinlock::Spinlock;
use crate::task::scheduler;
use alloc::collections::VecDeque;

struct PushlockInner {
    locked: bool,
    waiters: bool,
    owner_process: Option<u32>,
    wait_queue: VecDeque<u32>,
}

/// A process-owned blocking lock.
pub struct Pushlock {
    inner: Spinlock<PushlockInner>,
}

impl Pushlock {
    pub const fn new() -> Self {
        Pushlock {
            inner: Spinlock::new(PushlockInner {
                locked: false,
                waiters: false,
                owner_process: None,
                wait_queue: VecDeque::new(),
            }),
        }
    }

    /// Acquire the lock on behalf of `process`, blocking the calling thread
    /// if it is held.
    pub fn lock(&self, process: u32) {
        let me = scheduler::current_tid();
        loop {
            let mut inner = self.inner.lock();
            if !inner.locked {
                inner.locked = true;
                inner.owner_process = Some(process);
                return;
            }
            inner.waiters = true;
            inner.wait_queue.push_back(me);
            drop(inner);
            scheduler::block_current();
        }
    }

    /// Release the lock, waking the first waiter (if any). `LOCKED` is
    /// cleared unconditionally; the woken thread re-attempts the fast path
    /// rather than receiving the lock directly.
    pub fn unlock(&self) {
        let mut inner = self.inner.lock();
        inner.locked = false;
        inner.owner_process = None;
        let next = inner.wait_queue.pop_front();
        if inner.wait_queue.is_empty() {
            inner.waiters = false;
        }
        drop(inner);
        if let Some(tid) = next {
            scheduler::unblock(tid);
        }
    }

    /// Process id currently holding the lock, if any.
    pub fn owner(&self) -> Option<u32> {
        self.inner.lock().owner_process
    }

    /// Whether any thread is currently queued on this lock.
    pub fn has_waiters(&self) -> bool {
        self.inner.lock().waiters
    }
}

impl Default for Pushlock {
    fn default() -> Self {
        Self::new()
    }
}
