//! The fixed kernel panic code enumeration.
//!
//! These fifteen codes are the only values `fatal_error` ever reports; the
//! numeric values are part of the external interface (they show up in crash
//! dumps and debugger scripts) and must never be renumbered once assigned.

use core::fmt;

/// A fatal-error reason code, with a stable numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PanicCode {
    /// Explicit operator- or driver-requested crash, carrying no other
    /// diagnostic meaning.
    ManualCrash = 0,
    /// Code ran at an IRQL higher than the maximum the path tolerates.
    IrqlNotLessOrEqual = 1,
    /// Code ran at an IRQL lower than the minimum the path requires.
    IrqlNotGreaterOrEqual = 2,
    /// A DPC or ISR-only routine ran outside `IRQL::DISPATCH`.
    IrqlNotDispatch = 3,
    /// A spin lock was acquired twice by the same CPU (non-recursive lock).
    SpinLockAlreadyOwned = 4,
    /// A spin lock was released by a CPU that did not hold it.
    SpinLockNotOwned = 5,
    /// A CPU exception reached the default handler with no registered
    /// handler able to resolve it.
    ExceptionNotHandled = 6,
    /// A software trap reached the default handler unresolved.
    TrapNotHandled = 7,
    /// A page fault occurred above `IRQL::PASSIVE` or against an
    /// unmapped/invalid address with no handler able to resolve it.
    PageFaultNotHandled = 8,
    /// A system service request named an operation with no registered
    /// handler.
    SystemServiceNotHandled = 9,
    /// An NMI reported a hardware failure (e.g. an uncorrectable memory
    /// error).
    NmiHardwareFailure = 10,
    /// Physical memory initialization failed because too little memory was
    /// reported by the loader hand-off.
    InstallMoreMemory = 11,
    /// A page database entry failed its tag/flag consistency check on
    /// free.
    BadPfnHeader = 12,
    /// A pool block's header tag did not match the tag given to
    /// `free_pool`.
    BadPoolHeader = 13,
    /// A core system table (GDT, IDT, loader hand-off block) failed its
    /// validation check.
    BadSystemTable = 14,
    /// An object manager reference or dereference presented a tag that did
    /// not match the tag stamped at creation (spec §3's "tag invariant").
    /// Not one of the fifteen reserved core codes, but spec §6 only reserves
    /// those *first* fifteen values and leaves room for subsystem-specific
    /// codes above them; this is the one OB needs.
    BadObjectHeader = 15,
}

impl PanicCode {
    /// Returns the stable numeric code.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns the machine-readable name used in panic output (kebab-case,
    /// matching the external interface's textual form).
    pub const fn name(self) -> &'static str {
        match self {
            Self::ManualCrash => "manual-crash",
            Self::IrqlNotLessOrEqual => "irql-not-less-or-equal",
            Self::IrqlNotGreaterOrEqual => "irql-not-greater-or-equal",
            Self::IrqlNotDispatch => "irql-not-dispatch",
            Self::SpinLockAlreadyOwned => "spin-lock-already-owned",
            Self::SpinLockNotOwned => "spin-lock-not-owned",
            Self::ExceptionNotHandled => "exception-not-handled",
            Self::TrapNotHandled => "trap-not-handled",
            Self::PageFaultNotHandled => "page-fault-not-handled",
            Self::SystemServiceNotHandled => "system-service-not-handled",
            Self::NmiHardwareFailure => "nmi-hardware-failure",
            Self::InstallMoreMemory => "install-more-memory",
            Self::BadPfnHeader => "bad-pfn-header",
            Self::BadPoolHeader => "bad-pool-header",
            Self::BadSystemTable => "bad-system-table",
            Self::BadObjectHeader => "bad-object-header",
        }
    }
}

impl fmt::Display for PanicCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.name(), self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_are_stable() {
        assert_eq!(PanicCode::ManualCrash.as_u8(), 0);
        assert_eq!(PanicCode::IrqlNotLessOrEqual.as_u8(), 1);
        assert_eq!(PanicCode::IrqlNotGreaterOrEqual.as_u8(), 2);
        assert_eq!(PanicCode::IrqlNotDispatch.as_u8(), 3);
        assert_eq!(PanicCode::SpinLockAlreadyOwned.as_u8(), 4);
        assert_eq!(PanicCode::SpinLockNotOwned.as_u8(), 5);
        assert_eq!(PanicCode::ExceptionNotHandled.as_u8(), 6);
        assert_eq!(PanicCode::TrapNotHandled.as_u8(), 7);
        assert_eq!(PanicCode::PageFaultNotHandled.as_u8(), 8);
        assert_eq!(PanicCode::SystemServiceNotHandled.as_u8(), 9);
        assert_eq!(PanicCode::NmiHardwareFailure.as_u8(), 10);
        assert_eq!(PanicCode::InstallMoreMemory.as_u8(), 11);
        assert_eq!(PanicCode::BadPfnHeader.as_u8(), 12);
        assert_eq!(PanicCode::BadPoolHeader.as_u8(), 13);
        assert_eq!(PanicCode::BadSystemTable.as_u8(), 14);
        assert_eq!(PanicCode::BadObjectHeader.as_u8(), 15);
    }

    #[test]
    fn display_matches_external_textual_form() {
        assert_eq!(
            format!("{}", PanicCode::BadPoolHeader),
            "bad-pool-header (0x0d)"
        );
    }
}
