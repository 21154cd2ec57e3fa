//! Preemptive priority scheduler.
//!
//! A single ready queue and a single sleep queue, both plain FIFOs
//! ([`run_queue::ThreadQueue`]); selection scans the ready queue for the
//! highest *effective* priority rather than keeping it priority-ordered.
//! There is exactly one runnable thread at a time (this is a uniprocessor
//! kernel) addressed by [`CURRENT`]; everything else not asleep or blocked
//! sits on [`READY`].
//!
//! Threads live in [`Registry`], a slot table of `Box<Thread>` indexed by
//! tid: the `Box` gives each thread's fields a stable address that survives
//! the table growing, which is what lets [`do_switch`] take a raw pointer to
//! a thread's `saved_esp` across the table lock being dropped for the actual
//! context switch (see [`crate::sync::spinlock::SpinlockGuard::release_no_irq_restore`]).

mod lifecycle;
mod priority;
mod run_queue;
mod wait;

pub use lifecycle::{exit_current, kill_thread};
pub use priority::{
    blocked_lock_of, donate, effective_of, inheritance_owner_of, reset_to_base,
    set_blocked_lock, set_inheritance_owner, set_priority,
};
pub use wait::{block_current, sleep_ms, unblock};

use crate::sync::spinlock::Spinlock;
use crate::task::context::context_switch;
use crate::task::thread::{Thread, ThreadState};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use run_queue::ThreadQueue;

/// Slot table of live threads, indexed by tid. Slot 0 is never used (tids
/// start at 1), so the table is one longer than the highest live tid.
pub(super) struct Registry {
    threads: Vec<Option<Box<Thread>>>,
}

impl Registry {
    const fn new() -> Self {
        Registry { threads: Vec::new() }
    }

    pub(super) fn get(&self, tid: u32) -> Option<&Thread> {
        self.threads.get(tid as usize).and_then(|slot| slot.as_deref())
    }

    pub(super) fn get_mut(&mut self, tid: u32) -> Option<&mut Thread> {
        self.threads.get_mut(tid as usize).and_then(|slot| slot.as_deref_mut())
    }

    fn insert(&mut self, thread: Thread) -> u32 {
        let tid = thread.id;
        if self.threads.len() <= tid as usize {
            self.threads.resize_with(tid as usize + 1, || None);
        }
        self.threads[tid as usize] = Some(Box::new(thread));
        tid
    }

    pub(super) fn remove(&mut self, tid: u32) -> Option<Box<Thread>> {
        self.threads.get_mut(tid as usize).and_then(|slot| slot.take())
    }
}

pub(super) static THREADS: Spinlock<Registry> = Spinlock::new(Registry::new());
pub(super) static READY: Spinlock<ThreadQueue> = Spinlock::new(ThreadQueue::new());
pub(super) static SLEEPING: Spinlock<ThreadQueue> = Spinlock::new(ThreadQueue::new());

static CURRENT: AtomicU32 = AtomicU32::new(0);
static IDLE_TID: AtomicU32 = AtomicU32::new(0);
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Ticks elapsed since the scheduler was initialized.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Tid of the thread presently running on the CPU.
pub fn current_tid() -> u32 {
    CURRENT.load(Ordering::Relaxed)
}

pub(super) fn is_idle(tid: u32) -> bool {
    tid == IDLE_TID.load(Ordering::Relaxed)
}

/// Idle thread, scheduled only when the ready queue is empty.
extern "C" fn idle_entry() {
    loop {
        unsafe { core::arch::asm!("sti; hlt", options(nomem, nostack)); }
    }
}

/// Build the idle thread and the queues. Must run before any `spawn_*` call.
pub fn init() {
    let idle = Thread::new_kernel(idle_entry, 0, "idle");
    let tid = THREADS.lock().insert(idle);
    IDLE_TID.store(tid, Ordering::Relaxed);
    crate::serial_println!("[OK] scheduler initialized (idle tid={})", tid);
}

/// Create a kernel thread and place it on the ready queue.
pub fn spawn_kernel(entry: extern "C" fn(), priority: u8, name: &str) -> u32 {
    let thread = Thread::new_kernel(entry, priority, name);
    let tid = THREADS.lock().insert(thread);
    READY.lock().enqueue(tid);
    tid
}

/// Create a user thread resuming at `entry` on `user_stack_top` inside
/// `process`'s address space, and place it on the ready queue.
pub fn spawn_user(entry: u32, user_stack_top: u32, process: u32, priority: u8, name: &str) -> u32 {
    let thread = Thread::new_user(entry, user_stack_top, process, priority, name);
    let tid = THREADS.lock().insert(thread);
    READY.lock().enqueue(tid);
    tid
}

/// Look up a thread's current state. Used by `waitpid`-style callers and by
/// diagnostics; returns `None` once the thread has been reaped.
pub fn state_of(tid: u32) -> Option<ThreadState> {
    THREADS.lock().get(tid).map(|t| t.state)
}

/// Exit code of a thread that has reached [`ThreadState::Dead`], if any.
pub fn exit_code_of(tid: u32) -> Option<i32> {
    THREADS.lock().get(tid).and_then(|t| t.exit_code)
}

/// Starvation boost then highest-`effective`-wins scan (see
/// [`priority::boost_starved`]). Returns the idle thread if the ready queue
/// is empty. The returned tid has already been unlinked from `READY` and had
/// its `time_slice`/`time_since_last_run` reset; its `state` is left for the
/// caller to set to `Running`.
fn select_next() -> u32 {
    priority::boost_starved();

    let picked = READY.lock().remove_max_by(|tid| {
        THREADS.lock().get(tid).map(|t| t.priority.effective).unwrap_or(0)
    });

    match picked {
        Some(tid) => {
            let mut threads = THREADS.lock();
            if let Some(t) = threads.get_mut(tid) {
                t.time_slice = t.priority.base.max(1) as u32;
                t.time_since_last_run = 0;
            }
            tid
        }
        None => IDLE_TID.load(Ordering::Relaxed),
    }
}

/// Perform the very first switch away from the boot stack once the boot
/// sequence has spawned at least the first thread.
/// Never returns: the boot stack's frame below this call is abandoned.
pub fn start() -> ! {
    let next = select_next();
    let mut discarded_esp: u32 = 0;
    let new_esp = {
        let mut threads = THREADS.lock();
        if let Some(t) = threads.get_mut(next) {
            t.state = ThreadState::Running;
        }
        threads.get(next).unwrap().saved_esp
    };
    CURRENT.store(next, Ordering::Relaxed);
    unsafe { context_switch(&mut discarded_esp, new_esp); }
    unreachable!("threads never switch back to the abandoned boot stack");
}

/// Reschedule: pick the next thread and, if different from the one running,
/// context-switch to it. Called with the current thread's `state` already
/// set (Ready/Blocked/Sleeping/Dead) and, if applicable, already re-enqueued
/// on `READY` or `SLEEPING` by the caller.
pub(super) fn schedule() {
    let next = select_next();
    let current = CURRENT.load(Ordering::Relaxed);
    if next == current {
        if let Some(t) = THREADS.lock().get_mut(next) {
            t.state = ThreadState::Running;
        }
        return;
    }
    do_switch(next);
}

/// Switch from `CURRENT` to `next`, releasing the thread-table lock just
/// before the asm thunk so interrupts stay masked across the switch without
/// holding the lock for however long `next` runs before switching back.
fn do_switch(next: u32) {
    static mut DISCARD_ESP: u32 = 0;

    let current = CURRENT.load(Ordering::Relaxed);
    let (old_esp_ptr, new_esp): (*mut u32, u32) = {
        let mut threads = THREADS.lock();
        if let Some(t) = threads.get_mut(next) {
            t.state = ThreadState::Running;
        }
        let new_esp = threads.get(next).unwrap().saved_esp;
        let old_esp_ptr: *mut u32 = match threads.get_mut(current) {
            Some(t) => &mut t.saved_esp as *mut u32,
            // The outgoing thread already reaped itself (exit_current); its
            // saved_esp no longer matters, give context_switch scratch space.
            None => unsafe { core::ptr::addr_of_mut!(DISCARD_ESP) },
        };
        CURRENT.store(next, Ordering::Relaxed);
        threads.release_no_irq_restore();
        (old_esp_ptr, new_esp)
    };
    unsafe { context_switch(old_esp_ptr, new_esp); }
}

/// Voluntarily give up the CPU. Re-enqueues the current thread (unless it's
/// idle) before picking the next one.
pub fn yield_now() {
    let current = CURRENT.load(Ordering::Relaxed);
    if !is_idle(current) {
        if let Some(t) = THREADS.lock().get_mut(current) {
            t.state = ThreadState::Ready;
        }
        READY.lock().enqueue(current);
    }
    schedule();
}

/// Timer-tick entry point, called from the IRQ0 handler at 100 Hz.
///
/// Wakes sleepers whose `wake_time` has arrived, accounts the current
/// thread's time slice, and preempts it once the slice is exhausted.
pub fn sched_tick() {
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;

    {
        let mut sleeping = SLEEPING.lock();
        let mut threads = THREADS.lock();
        let due: Vec<u32> = sleeping
            .iter()
            .copied()
            .filter(|&tid| threads.get(tid).map(|t| t.wake_time <= now).unwrap_or(true))
            .collect();
        for tid in due {
            sleeping.remove(tid);
            if let Some(t) = threads.get_mut(tid) {
                t.state = ThreadState::Ready;
            }
            drop(threads);
            READY.lock().enqueue(tid);
            threads = THREADS.lock();
        }
    }

    let current = CURRENT.load(Ordering::Relaxed);
    let exhausted = {
        let mut threads = THREADS.lock();
        match threads.get_mut(current) {
            Some(t) => {
                t.uptime += 1;
                if t.time_slice > 0 {
                    t.time_slice -= 1;
                }
                t.time_slice == 0
            }
            None => false,
        }
    };

    if exhausted {
        yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_insert_get_remove_roundtrip() {
        let mut reg = Registry::new();
        let thread = Thread::new_kernel(idle_entry, 5, "t");
        let tid = reg.insert(thread);
        assert_eq!(reg.get(tid).unwrap().priority.base, 5);
        assert!(reg.remove(tid).is_some());
        assert!(reg.get(tid).is_none());
    }
}
