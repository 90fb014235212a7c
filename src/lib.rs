//! MSCR — a compiler from M-Script down to MCPC assembly.
//!
//! See `src/bin/mscr.rs` for the command-line driver using this library.

pub mod back;
pub mod common;
pub mod driver;
pub mod error;
pub mod front;
pub mod middle;
