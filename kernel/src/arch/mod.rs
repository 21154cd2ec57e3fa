//! Architecture-specific modules.
//!
//! Platform-agnostic code should use `arch::hal::*` instead of
//! directly referencing `arch::x86::*`.

pub mod hal;
pub mod x86;
