//! IRQ-masking spinlock.
//!
//! The kernel runs on a single CPU, so the only thing a spinlock protects
//! against here is an interrupt handler re-entering a critical section that
//! the interrupted code already holds. `lock()` therefore disables interrupts
//! before spinning and the guard restores the saved interrupt state on drop —
//! on a uniprocessor machine the CAS loop itself almost never actually spins,
//! but keeping it makes the primitive correct if code ever calls `lock()`
//! from a context that raced past the `cli`.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// An IRQ-masking spinlock protecting data of type `T`.
pub struct Spinlock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Spinlock<T> {}
unsafe impl<T: Send> Send for Spinlock<T> {}

/// RAII guard for a held [`Spinlock`]. Restores the saved interrupt state on drop.
pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
    irq_was_enabled: bool,
}

/// Disables interrupts and returns whether they were previously enabled, for
/// callers that need to mask interrupts across a critical section spanning
/// more than a single [`Spinlock`] guard (e.g. a temporary CR3 switch).
/// Pair with [`pop_noint`].
#[inline]
pub fn push_noint() -> bool {
    let was_enabled = crate::arch::hal::interrupts_enabled();
    crate::arch::hal::disable_interrupts();
    was_enabled
}

/// Restores the interrupt state returned by a matching [`push_noint`].
#[inline]
pub fn pop_noint(was_enabled: bool) {
    if was_enabled {
        crate::arch::hal::enable_interrupts();
    }
}

impl<T> Spinlock<T> {
    /// Create a new unlocked spinlock wrapping the given data.
    pub const fn new(data: T) -> Self {
        Spinlock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, masking interrupts first and spinning until available.
    pub fn lock(&self) -> SpinlockGuard<T> {
        let was_enabled = crate::arch::hal::interrupts_enabled();
        crate::arch::hal::disable_interrupts();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }

        SpinlockGuard { lock: self, irq_was_enabled: was_enabled }
    }

    /// Try to acquire the lock without blocking. Safe to call from interrupt context.
    pub fn try_lock(&self) -> Option<SpinlockGuard<T>> {
        let was_enabled = crate::arch::hal::interrupts_enabled();
        crate::arch::hal::disable_interrupts();

        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinlockGuard { lock: self, irq_was_enabled: was_enabled })
        } else {
            if was_enabled {
                crate::arch::hal::enable_interrupts();
            }
            None
        }
    }

    /// Returns `true` if the lock is currently held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Force-release the lock unconditionally.
    ///
    /// # Safety
    /// Caller must know the lock is actually held and that no other code is
    /// mid-access to the protected data.
    pub unsafe fn force_unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

impl<'a, T> Deref for SpinlockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinlockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> SpinlockGuard<'a, T> {
    /// Release the lock without restoring the saved interrupt state —
    /// interrupts remain disabled. Used by the scheduler to keep IF=0 from
    /// acquisition of the run queue lock through the context switch itself.
    pub fn release_no_irq_restore(self) {
        self.lock.locked.store(false, Ordering::Release);
        core::mem::forget(self);
    }
}

impl<'a, T> Drop for SpinlockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        if self.irq_was_enabled {
            crate::arch::hal::enable_interrupts();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_excludes_reentry_attempt() {
        let lock = Spinlock::new(0u32);
        let mut guard = lock.lock();
        *guard = 42;
        assert!(lock.is_locked());
        drop(guard);
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 42);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = Spinlock::new(());
        let _g = lock.lock();
        assert!(lock.try_lock().is_none());
    }
}
