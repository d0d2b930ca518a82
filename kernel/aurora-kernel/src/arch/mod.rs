//! Architecture-specific HAL code (spec L1/L3).
//!
//! Only `x86_64` is implemented; [`crate::lib`] gates this whole module
//! behind `target_arch = "x86_64"` so a future port can add a sibling
//! `aarch64` module without disturbing the IRQL ladder or any of the
//! higher layers, which only ever see the software [`crate::irql::Irql`]
//! ordinal.

pub mod x86_64;
