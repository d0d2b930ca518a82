//! Host-testable synchronization primitives.
//!
//! `aurora-kernel` builds its IRQL-aware locks on top of these: the plain
//! [`SpinLock`] and [`RwLock`] here know nothing about interrupts or IRQL,
//! which is exactly what lets them be exercised with `cargo test` on the
//! host.

mod rwlock;
mod spinlock;

pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use spinlock::{SpinLock, SpinLockGuard};
