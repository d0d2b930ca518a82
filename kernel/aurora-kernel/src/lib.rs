//! Aurora kernel execution substrate.
//!
//! Layers L1 (HAL-low: IRQL, spin locks, context frames) through L8 (driver
//! plumbing) of the kernel, built on the host-testable vocabulary in
//! `aurora-core` and the memory manager in `aurora-mm`. Everything below
//! this crate can be exercised with `cargo test` on the host; everything
//! here either wraps real hardware (GDT/IDT, APIC, TSC) or depends on a
//! running scheduler, so most of it only compiles for the kernel target.
//!
//! Pure-logic pieces (IRQL ladder arithmetic, DPC queue ordering, mutex
//! recursion counting, dispatcher wait-list bookkeeping) are written so they
//! also build and test on the host, matching the teacher's own split between
//! `#[cfg(target_os = "none")]` hardware modules and always-available logic
//! modules.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "x86_64", feature(abi_x86_interrupt))]
#![warn(missing_docs)]

pub mod backtrace;
pub mod boot;
pub mod config;
pub mod drivers;
pub mod ev;
pub mod irql;
pub mod ke;
pub mod log;
pub mod ob;
pub mod ps;
pub mod sync;

#[cfg(target_arch = "x86_64")]
pub mod arch;

pub use aurora_core::panic_code::PanicCode;

/// Emits a diagnostic at [`aurora_core::log::Level::Info`]. See
/// [`crate::log`] for the sink registry this draws from.
#[macro_export]
macro_rules! kprintln {
    ($($arg:tt)*) => {
        $crate::log::dispatch($crate::log::Level::Info, module_path!(), format_args!($($arg)*))
    };
}

/// Emits a diagnostic at [`aurora_core::log::Level::Debug`].
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {
        $crate::log::dispatch($crate::log::Level::Debug, module_path!(), format_args!($($arg)*))
    };
}

/// Emits a diagnostic at [`aurora_core::log::Level::Warn`].
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {
        $crate::log::dispatch($crate::log::Level::Warn, module_path!(), format_args!($($arg)*))
    };
}

/// Emits a diagnostic at [`aurora_core::log::Level::Error`].
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {
        $crate::log::dispatch($crate::log::Level::Error, module_path!(), format_args!($($arg)*))
    };
}
