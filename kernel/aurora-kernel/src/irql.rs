//! Interrupt request level (IRQL): the ordinal ladder that linearizes local
//! concurrency (spec §4.2).
//!
//! Tracked per-CPU as a software `AtomicU8` rather than bound to the x86-64
//! task-priority register directly, so the same contract holds on a target
//! without a TPR (the teacher keeps an `aarch64` stub arch alongside
//! `x86_64`). On x86-64 [`raise`]/[`lower`] additionally gate the Local APIC
//! TPR (`aurora-kernel::arch::x86_64::hw::local_apic`) so hardware delivery
//! and the software ladder never disagree.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use aurora_core::cpu_local::{CpuLocal, MAX_CPUS};
use aurora_core::panic_code::PanicCode;

/// An IRQL value. Higher values preempt lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Irql(u8);

impl Irql {
    /// Normal thread execution; nothing is masked.
    pub const PASSIVE: Irql = Irql(0);
    /// The scheduler will not preempt and pool allocation is forbidden at or
    /// above this level (spec §4.2, §5).
    pub const DISPATCH: Irql = Irql(4);
    /// First device-interrupt level; individual drivers may request higher
    /// device levels up to [`Irql::CLOCK`].
    pub const DEVICE: Irql = Irql(5);
    /// The periodic timer tick.
    pub const CLOCK: Irql = Irql(14);
    /// IPI and the panic freeze handler run here; nothing may preempt it.
    pub const MAX: Irql = Irql(15);

    /// Wraps a raw ordinal. Callers within this crate only ever use the
    /// named constants or [`Irql::device`]; kept `const fn` for those.
    const fn new(value: u8) -> Self {
        Self(value)
    }

    /// A device IRQL `offset` levels above [`Irql::DEVICE`], clamped below
    /// [`Irql::CLOCK`].
    #[must_use]
    pub const fn device(offset: u8) -> Self {
        let raw = Self::DEVICE.0 + offset;
        if raw >= Self::CLOCK.0 {
            Irql(Self::CLOCK.0 - 1)
        } else {
            Irql(raw)
        }
    }

    /// The raw ordinal, 0..=15.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Irql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::PASSIVE => f.write_str("PASSIVE"),
            Self::DISPATCH => f.write_str("DISPATCH"),
            Self::CLOCK => f.write_str("CLOCK"),
            Self::MAX => f.write_str("MAX"),
            other => write!(f, "IRQL({})", other.0),
        }
    }
}

/// Errors [`raise`]/[`lower`] report; callers are expected to turn these
/// into `fatal_error` (spec §7 category 2) — IRQL misordering is always a
/// programmer bug, never recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqlError {
    /// `raise(new)` was called with `new < get_irql()`.
    NotGreaterOrEqual { current: Irql, requested: Irql },
    /// `lower(new)` was called with `new > get_irql()`.
    NotLessOrEqual { current: Irql, requested: Irql },
}

impl IrqlError {
    /// The [`PanicCode`] this error maps onto for `fatal_error`.
    #[must_use]
    pub const fn panic_code(self) -> PanicCode {
        match self {
            Self::NotGreaterOrEqual { .. } => PanicCode::IrqlNotGreaterOrEqual,
            Self::NotLessOrEqual { .. } => PanicCode::IrqlNotLessOrEqual,
        }
    }
}

impl fmt::Display for IrqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NotGreaterOrEqual { current, requested } => write!(
                f,
                "cannot raise IRQL from {current} to {requested}: not greater-or-equal"
            ),
            Self::NotLessOrEqual { current, requested } => write!(
                f,
                "cannot lower IRQL from {current} to {requested}: not less-or-equal"
            ),
        }
    }
}

struct CurrentIrql(AtomicU8);

// Every element starts at PASSIVE: a CPU that has not yet run any kernel
// code is, by convention, at the lowest level.
static CURRENT_IRQL: CpuLocal<CurrentIrql> =
    CpuLocal::new([const { CurrentIrql(AtomicU8::new(0)) }; MAX_CPUS]);

/// Reads the current CPU's IRQL. Cheap: a single relaxed load.
#[must_use]
pub fn get_irql() -> Irql {
    Irql::new(CURRENT_IRQL.get().0.load(Ordering::Relaxed))
}

/// Raises the current CPU's IRQL to `new`, returning the previous level so
/// the caller can [`lower`] back to it.
///
/// # Errors
///
/// Returns [`IrqlError::NotGreaterOrEqual`] if `new < get_irql()`.
pub fn raise(new: Irql) -> Result<Irql, IrqlError> {
    let slot = &CURRENT_IRQL.get().0;
    let current = Irql::new(slot.load(Ordering::Relaxed));
    if new < current {
        return Err(IrqlError::NotGreaterOrEqual {
            current,
            requested: new,
        });
    }
    slot.store(new.as_u8(), Ordering::Relaxed);
    gate_hardware_delivery(new);
    Ok(current)
}

/// Lowers the current CPU's IRQL to `new`.
///
/// # Errors
///
/// Returns [`IrqlError::NotLessOrEqual`] if `new > get_irql()`.
pub fn lower(new: Irql) -> Result<(), IrqlError> {
    let slot = &CURRENT_IRQL.get().0;
    let current = Irql::new(slot.load(Ordering::Relaxed));
    if new > current {
        return Err(IrqlError::NotLessOrEqual {
            current,
            requested: new,
        });
    }
    slot.store(new.as_u8(), Ordering::Relaxed);
    gate_hardware_delivery(new);
    Ok(())
}

/// Returns `true` if a vector whose priority is `vector_irql` may currently
/// be delivered: "a vector with priority ≤ current IRQL is blocked until the
/// level drops" (spec §4.2).
#[must_use]
pub fn can_deliver(vector_irql: Irql) -> bool {
    vector_irql > get_irql()
}

/// Asserts the current IRQL does not exceed `max`, the precondition for
/// operations forbidden above a given level (pool allocation above
/// DISPATCH, waiting above DISPATCH — spec §5).
///
/// # Errors
///
/// Returns [`IrqlError::NotLessOrEqual`] if the current IRQL exceeds `max`.
pub fn require_at_most(max: Irql) -> Result<(), IrqlError> {
    let current = get_irql();
    if current > max {
        Err(IrqlError::NotLessOrEqual {
            current,
            requested: max,
        })
    } else {
        Ok(())
    }
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
fn gate_hardware_delivery(level: Irql) {
    crate::arch::x86_64::hw::local_apic::set_task_priority(level.as_u8());
}

#[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
fn gate_hardware_delivery(_level: Irql) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    // Every test hits the same process-global CURRENT_IRQL slot for CPU 0
    // (the host `current_cpu_id()` always returns 0) and `cargo test` runs
    // tests on separate threads by default, so serialize the whole module
    // through one lock rather than let tests race each other's IRQL state.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn reset() -> MutexGuard<'static, ()> {
        let guard = TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = lower(Irql::PASSIVE);
        guard
    }

    #[test]
    fn raise_then_lower_round_trips() {
        let _guard = reset();
        let prev = raise(Irql::DISPATCH).unwrap();
        assert_eq!(prev, Irql::PASSIVE);
        assert_eq!(get_irql(), Irql::DISPATCH);
        lower(Irql::PASSIVE).unwrap();
        assert_eq!(get_irql(), Irql::PASSIVE);
    }

    #[test]
    fn raise_below_current_is_rejected() {
        let _guard = reset();
        raise(Irql::DISPATCH).unwrap();
        let err = raise(Irql::PASSIVE).unwrap_err();
        assert_eq!(
            err,
            IrqlError::NotGreaterOrEqual {
                current: Irql::DISPATCH,
                requested: Irql::PASSIVE
            }
        );
    }

    #[test]
    fn lower_above_current_is_rejected() {
        let _guard = reset();
        let err = lower(Irql::DISPATCH).unwrap_err();
        assert_eq!(
            err,
            IrqlError::NotLessOrEqual {
                current: Irql::PASSIVE,
                requested: Irql::DISPATCH
            }
        );
    }

    #[test]
    fn nested_raise_lower_is_symmetric() {
        let _guard = reset();
        let p0 = raise(Irql::DISPATCH).unwrap();
        let p1 = raise(Irql::CLOCK).unwrap();
        assert_eq!(p1, Irql::DISPATCH);
        lower(p1).unwrap();
        assert_eq!(get_irql(), Irql::DISPATCH);
        lower(p0).unwrap();
        assert_eq!(get_irql(), Irql::PASSIVE);
    }

    #[test]
    fn can_deliver_is_blocked_at_or_below_current() {
        let _guard = reset();
        raise(Irql::DISPATCH).unwrap();
        assert!(!can_deliver(Irql::PASSIVE));
        assert!(!can_deliver(Irql::DISPATCH));
        assert!(can_deliver(Irql::CLOCK));
    }

    #[test]
    fn require_at_most_rejects_when_exceeded() {
        let _guard = reset();
        raise(Irql::DISPATCH).unwrap();
        assert!(require_at_most(Irql::PASSIVE).is_err());
        assert!(require_at_most(Irql::DISPATCH).is_ok());
    }

    #[test]
    fn device_offset_clamps_below_clock() {
        assert!(Irql::device(0) == Irql::DEVICE);
        assert!(Irql::device(200) < Irql::CLOCK);
    }
}
