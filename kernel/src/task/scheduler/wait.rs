//! Voluntary blocking: block/unblock used by sync primitives, and sleep.
//!
//! Wait-queue enrollment (mutex/pushlock/turnstile wait lists) is always the
//! caller's responsibility — these functions only touch scheduler state.

use super::{schedule, READY, SLEEPING, THREADS};
use crate::task::thread::ThreadState;

/// Ticks per millisecond at the configured PIT rate, rounded down to at
/// least one tick so `sleep_ms(1)` still blocks for a tick.
fn ms_to_ticks(ms: u32) -> u64 {
    let ticks = (ms as u64 * crate::arch::x86::pit::TICK_HZ as u64) / 1000;
    ticks.max(1)
}

/// Block the calling thread and reschedule. The caller must already have
/// (or be about to, before any interrupt can intervene) enrolled the current
/// thread on whatever wait queue will eventually call [`unblock`].
pub fn block_current() {
    let current = super::current_tid();
    {
        let mut threads = THREADS.lock();
        if let Some(t) = threads.get_mut(current) {
            t.state = ThreadState::Blocked;
        }
    }
    schedule();
}

/// Move a blocked thread back to the ready queue.
pub fn unblock(tid: u32) {
    {
        let mut threads = THREADS.lock();
        if let Some(t) = threads.get_mut(tid) {
            t.state = ThreadState::Ready;
        }
    }
    READY.lock().enqueue(tid);
}

/// Block the calling thread on the sleep queue for approximately `ms`
/// milliseconds. Woken by [`super::sched_tick`] once `wake_time` is reached.
pub fn sleep_ms(ms: u32) {
    let current = super::current_tid();
    let wake_time = super::ticks() + ms_to_ticks(ms);
    {
        let mut threads = THREADS.lock();
        if let Some(t) = threads.get_mut(current) {
            t.wake_time = wake_time;
            t.state = ThreadState::Sleeping;
        }
    }
    SLEEPING.lock().enqueue(current);
    schedule();
}
