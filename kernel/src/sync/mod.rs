//! Synchronization primitives for the kernel.
//!
//! Provides an IRQ-safe [`spinlock::Spinlock`], a sleeping [`mutex::Mutex`]
//! with priority-inheritance via [`turnstile`], and a process-owned
//! [`pushlock::Pushlock`].

pub mod mutex;
pub mod pushlock;
pub mod spinlock;
pub mod turnstile;
