//! Memory manager: physical frame database, KASLR virtual address arena, and
//! the tagged pool allocator — layer L2 of the kernel's execution substrate.
//!
//! This crate has no knowledge of IRQL or the panic path; both live above it
//! in `aurora-kernel`. Every fallible entry point here returns a `Result`
//! (spec §7 category 1, recoverable) or surfaces an invariant violation as
//! an `Err` variant (spec §7 category 2) rather than panicking directly —
//! `aurora-kernel` is responsible for turning the latter into
//! `fatal_error(..)` with the matching `PanicCode`, since only it has the
//! panic path and IRQL machinery those require.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod arena;
pub mod pfdb;
pub mod pool;

pub use pfdb::{PageFrameDatabase, PmmError};
