//! Sleeping mutex with ownership transfer on unlock.
//!
//! Unlike [`crate::sync::spinlock::Spinlock`], a blocked thread here is
//! actually taken off the CPU: failing the fast-path CAS enrolls the
//! calling thread on the lock's [`crate::sync::turnstile`] entry (which
//! donates its priority to whoever holds the lock) and puts it to sleep via
//! the scheduler. `unlock` hands ownership directly to the woken waiter
//! rather than reopening the lock for anyone to grab, so a thread that wakes
//! from `lock` always already owns it.

use crate::sync::spinlock::Spinlock;
use crate::sync::turnstile;
use crate::task::scheduler;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

struct MutexInner {
    locked: bool,
    owner: Option<u32>,
}

/// A blocking mutex protecting data of type `T`.
pub struct Mutex<T> {
    inner: Spinlock<MutexInner>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

/// RAII guard for a held [`Mutex`]. Releases on drop, waking the next
/// waiter (if any) and transferring ownership to it.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Mutex {
            inner: Spinlock::new(MutexInner { locked: false, owner: None }),
            data: UnsafeCell::new(data),
        }
    }

    /// Address used as this lock's turnstile key. Stable for the mutex's
    /// lifetime since it is the address of its own internal state.
    fn addr(&self) -> usize {
        &self.inner as *const _ as usize
    }

    /// Acquire the mutex, blocking the calling thread if it is held.
    pub fn lock(&self) -> MutexGuard<T> {
        let me = scheduler::current_tid();
        loop {
            let mut inner = self.inner.lock();
            if !inner.locked {
                inner.locked = true;
                inner.owner = Some(me);
                drop(inner);
                turnstile::set_owner(self.addr(), me);
                return MutexGuard { mutex: self };
            }
            if inner.owner == Some(me) {
                // Ownership was transferred to us by the previous holder's unlock.
                return MutexGuard { mutex: self };
            }
            drop(inner);
            turnstile::block(self.addr(), me);
            scheduler::block_current();
        }
    }

    fn unlock(&self) {
        let addr = self.addr();
        let mut inner = self.inner.lock();
        let prev_owner = inner.owner.take().expect("unlock of a mutex with no owner");
        match turnstile::release(addr, prev_owner) {
            Some(new_owner) => {
                inner.locked = true;
                inner.owner = Some(new_owner);
                drop(inner);
                scheduler::unblock(new_owner);
            }
            None => {
                inner.locked = false;
            }
        }
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
