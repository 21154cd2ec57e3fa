//! Process signal delivery: a per-process pending/mask bitmask pair, a
//! handler table, and default actions for signals nobody has caught.
//!
//! Sending the same signal twice before it is dispatched coalesces to a
//! single delivery — the pending set is a bitmask, not a counter. This is a
//! deliberate, documented semantic loss rather than a bug: POSIX real-time
//! signal queuing is out of scope here.

use crate::task::process::{self, ProcessState};

/// Interrupt (e.g. Ctrl-C).
pub const SIGINT: u32 = 2;
/// Kill. Cannot be blocked, caught, or ignored.
pub const SIGKILL: u32 = 9;
/// Segmentation violation.
pub const SIGSEGV: u32 = 11;
/// Terminate.
pub const SIGTERM: u32 = 15;
/// User-defined signal 1.
pub const SIGUSR1: u32 = 16;
/// User-defined signal 2.
pub const SIGUSR2: u32 = 17;
/// Continue after a stop.
pub const SIGCONT: u32 = 18;
/// Stop. Cannot be caught or ignored (but can be sent/blocked like any other).
pub const SIGSTOP: u32 = 19;
/// One past the highest valid signal number.
pub const SIGMAX: u32 = 32;

/// A process's signal handler: receives the signal number.
pub type SignalHandler = fn(u32);

/// What happens to a signal with no installed handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefaultAction {
    Ignore,
    Terminate,
    Core,
    Stop,
    Continue,
}

fn default_action(sig: u32) -> DefaultAction {
    match sig {
        SIGUSR1 | SIGUSR2 => DefaultAction::Ignore,
        SIGINT | SIGKILL | SIGTERM => DefaultAction::Terminate,
        SIGSEGV => DefaultAction::Core,
        SIGSTOP => DefaultAction::Stop,
        SIGCONT => DefaultAction::Continue,
        _ => DefaultAction::Ignore,
    }
}

/// Per-process pending/mask bitmasks and handler table, guarded by the
/// owning [`crate::task::process::Process`]'s `sig_lock`.
pub struct SignalState {
    /// Bit *i* set iff signal *i* has been sent and not yet dispatched.
    pub pending: u32,
    /// Bit *i* set iff delivery of signal *i* is deferred. Ignored for
    /// SIGKILL and SIGSTOP, which can never be masked.
    pub mask: u32,
    pub handlers: [Option<SignalHandler>; SIGMAX as usize],
}

impl SignalState {
    pub const fn new() -> Self {
        SignalState {
            pending: 0,
            mask: 0,
            handlers: [None; SIGMAX as usize],
        }
    }
}

/// Mark `sig` pending on `pid`. Returns `-1` for an invalid pid or an
/// out-of-range signal number, `0` on success. A process need not be
/// running to receive a signal; `dispatch` picks it up the next time the
/// process's own dispatch loop runs.
pub fn send(pid: u32, sig: u32) -> i32 {
    if sig == 0 || sig >= SIGMAX {
        return -1;
    }
    match process::with_process(pid, |p| {
        p.sig_lock.lock().pending |= 1 << sig;
    }) {
        Some(()) => 0,
        None => -1,
    }
}

/// Install `handler` for `sig` on `pid`. Rejects SIGKILL and SIGSTOP, which
/// always run their default action regardless of any handler table entry.
pub fn set_handler(pid: u32, sig: u32, handler: SignalHandler) -> i32 {
    if sig == 0 || sig >= SIGMAX || sig == SIGKILL || sig == SIGSTOP {
        return -1;
    }
    match process::with_process(pid, |p| {
        p.sig_lock.lock().handlers[sig as usize] = Some(handler);
    }) {
        Some(()) => 0,
        None => -1,
    }
}

/// Drain every pending, deliverable signal on `pid` in ascending signal
/// number order. `sig_lock` is dropped across the handler call (or default
/// action) so the handler can send signals elsewhere — including to its own
/// process — without deadlocking, and the pending/mask bits are re-read on
/// each iteration since they may have changed while the lock was dropped.
pub fn dispatch(pid: u32) {
    loop {
        let sig = match process::with_process(pid, |p| {
            let state = p.sig_lock.lock();
            (1..SIGMAX).find(|&s| {
                let bit = 1u32 << s;
                state.pending & bit != 0
                    && (state.mask & bit == 0 || s == SIGKILL || s == SIGSTOP)
            })
        }) {
            Some(Some(s)) => s,
            _ => return,
        };

        let handler = match process::with_process(pid, |p| {
            let mut state = p.sig_lock.lock();
            state.pending &= !(1 << sig);
            state.handlers[sig as usize]
        }) {
            Some(h) => h,
            None => return,
        };

        match handler {
            Some(f) if sig != SIGKILL && sig != SIGSTOP => f(sig),
            _ => run_default_action(pid, sig),
        }
    }
}

/// Apply `sig`'s default action to `pid` (no handler installed, or the
/// signal can't be handled at all).
fn run_default_action(pid: u32, sig: u32) {
    match default_action(sig) {
        DefaultAction::Ignore => {}
        DefaultAction::Terminate | DefaultAction::Core => {
            process::with_process(pid, |p| {
                p.state = ProcessState::Zombie;
                p.exit_code = Some(128 + sig as i32);
            });
        }
        // Job-control stop/continue has no process-state counterpart in
        // this kernel (no SIGCHLD, no stopped-process scheduling class);
        // both are accepted and otherwise no-ops.
        DefaultAction::Stop | DefaultAction::Continue => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_action_table_matches_spec() {
        assert_eq!(default_action(SIGUSR1), DefaultAction::Ignore);
        assert_eq!(default_action(SIGTERM), DefaultAction::Terminate);
        assert_eq!(default_action(SIGSEGV), DefaultAction::Core);
        assert_eq!(default_action(SIGSTOP), DefaultAction::Stop);
        assert_eq!(default_action(SIGCONT), DefaultAction::Continue);
    }
}
