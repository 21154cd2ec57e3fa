//! Per-process metadata: address space, thread roster, and signal state.

use crate::ipc::signal::SignalState;
use crate::sync::spinlock::Spinlock;
use alloc::boxed::Box;
use alloc::vec::Vec;

static mut NEXT_PID: u32 = 1;

/// Lifecycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is running or has runnable threads.
    Active,
    /// Process has exited but has not been fully reaped.
    Zombie,
    /// Process has exited and all resources have been reclaimed.
    Exited,
}

/// A process with its own address space, consisting of one or more threads.
pub struct Process {
    pub pid: u32,
    pub parent_pid: u32,
    pub state: ProcessState,
    /// Physical address of this process's page directory.
    pub page_directory: u32,
    pub thread_ids: Vec<u32>,
    pub name: [u8; 64],
    pub exit_code: Option<i32>,
    /// Pending/mask bitmasks and handler table, guarded by `sig_lock` so a
    /// sender and the process's own dispatch loop never race on delivery.
    pub sig_lock: Spinlock<SignalState>,
}

impl Process {
    /// Create a new process with the given name and page directory physical address.
    pub fn new(name: &str, page_directory: u32) -> Self {
        let pid = unsafe {
            let p = NEXT_PID;
            NEXT_PID += 1;
            p
        };

        let mut name_buf = [0u8; 64];
        let bytes = name.as_bytes();
        let len = bytes.len().min(63);
        name_buf[..len].copy_from_slice(&bytes[..len]);

        Process {
            pid,
            parent_pid: 0,
            state: ProcessState::Active,
            page_directory,
            thread_ids: Vec::new(),
            name: name_buf,
            exit_code: None,
            sig_lock: Spinlock::new(SignalState::new()),
        }
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(64);
        core::str::from_utf8(&self.name[..len]).unwrap_or("???")
    }
}

/// Slot table of live processes indexed by pid, mirroring
/// [`crate::task::scheduler::Registry`]'s shape for threads. Slot 0 is
/// never used (pids start at 1, matching `NEXT_PID`'s initial value).
static PROCESSES: Spinlock<Vec<Option<Box<Process>>>> = Spinlock::new(Vec::new());

/// Register a process, returning its pid.
pub fn register(process: Process) -> u32 {
    let pid = process.pid;
    let mut table = PROCESSES.lock();
    if table.len() <= pid as usize {
        table.resize_with(pid as usize + 1, || None);
    }
    table[pid as usize] = Some(Box::new(process));
    pid
}

/// Run `f` against the live process with the given pid, if any. Used by the
/// signal pipeline so a send/dispatch against an unknown pid cleanly
/// reports failure instead of panicking.
pub fn with_process<R>(pid: u32, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
    let mut table = PROCESSES.lock();
    table.get_mut(pid as usize).and_then(|slot| slot.as_deref_mut()).map(f)
}

/// Drop a process's table entry once it has been fully reaped.
pub fn remove(pid: u32) -> Option<Box<Process>> {
    let mut table = PROCESSES.lock();
    table.get_mut(pid as usize).and_then(|slot| slot.take())
}
