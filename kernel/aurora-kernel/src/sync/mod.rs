//! IRQL-aware locking.
//!
//! Builds on [`aurora_core::sync::SpinLock`] — itself unaware of IRQL — by
//! pairing the raw lock with an owning-CPU check and an [`crate::irql`]
//! raise/lower around the critical section (spec §4.2): "`acquire_and_raise`
//! raises first, then busy-loops... `release_and_lower` releases then
//! lowers."

mod spinlock;

pub use spinlock::{IrqlSpinLock, IrqlSpinLockGuard};
