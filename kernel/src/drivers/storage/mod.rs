//! Block storage device drivers.
//!
//! `ata` holds the PIO primitives and the request queue built on top of them.

pub mod ata;
