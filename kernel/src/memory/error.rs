//! Crate-wide error taxonomy for the memory subsystems (§7 error handling design).
//!
//! Every internal allocator/VMM/heap API returns `Result<T>` instead of the
//! sentinel integers/null pointers the original C implementation used;
//! translation to a compact failure code happens only at the outermost
//! syscall/assembly boundary.

use crate::memory::address::VirtAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The PMM has no free block of the requested order (or ran out of frames
    /// partway through a multi-block request and rolled back).
    OutOfMemory,
    /// `map()` was asked to install a mapping where one already exists, or
    /// a class-allocation scan wrapped without finding a free run.
    MappingConflict { va: VirtAddr },
    /// Null buffer, zero count, out-of-range order, or similar caller error.
    InvalidArgument(&'static str),
    /// An ACPI table or RSDP checksum did not sum to zero.
    ChecksumFailure,
    /// A block device reported an error status bit.
    DeviceError { status: u8 },
    /// A signal number outside `[1, SIGMAX]`, or an invalid PID.
    InvalidSignal,
}

pub type Result<T> = core::result::Result<T, KernelError>;
