//! Device drivers the kernel core depends on directly: the serial log, a
//! VGA text-mode fallback console for the panic banner, and the ATA block
//! device behind the request queue.

pub mod serial;
pub mod storage;
pub mod vga_text;
