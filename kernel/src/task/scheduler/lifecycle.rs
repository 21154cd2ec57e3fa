//! Thread lifecycle: exit and forced kill.

use super::{READY, SLEEPING, THREADS};
use crate::task::thread::ThreadState;

/// Mark the running thread `Dead` with `code` and switch away from it for
/// good. Never returns: a dead thread is never selected to run again, and
/// its kernel stack is reclaimed only once it is reaped by [`kill_thread`]
/// or a `waitpid`-style caller dropping its table entry.
pub fn exit_current(code: i32) -> ! {
    let current = super::current_tid();
    {
        let mut threads = THREADS.lock();
        if let Some(t) = threads.get_mut(current) {
            t.state = ThreadState::Dead;
            t.exit_code = Some(code);
        }
    }
    READY.lock().remove(current);
    SLEEPING.lock().remove(current);
    super::schedule();
    unreachable!("a dead thread is never selected to run again");
}

/// Forcibly terminate `tid` with exit code `-1`, removing it from whichever
/// queue it currently occupies. Used to tear down the sibling threads of a
/// process whose leader has exited.
pub fn kill_thread(tid: u32) {
    if tid == super::current_tid() {
        exit_current(-1);
    }
    {
        let mut threads = THREADS.lock();
        if let Some(t) = threads.get_mut(tid) {
            t.state = ThreadState::Dead;
            t.exit_code = Some(-1);
        }
    }
    READY.lock().remove(tid);
    SLEEPING.lock().remove(tid);
}

/// Drop a dead thread's table entry, reclaiming its kernel stack. Callers
/// must have already observed `state_of(tid) == Some(ThreadState::Dead)`.
pub fn reap(tid: u32) {
    THREADS.lock().remove(tid);
}
