//! The ACPI root-table hand-off surface (spec §1, §4.1, §6).
//!
//! `aurora_acpi` owns RSDP validation and RSDT/XSDT walking; it is pure
//! byte-slice logic with no notion of how physical memory gets mapped. This
//! module is the one place that generality meets the booted kernel: it
//! holds the validated [`Rsdp`] the loader block pointed at, and a
//! caller-installed translator from physical address to a readable byte
//! slice, so `crate::boot` can hand tables to external driver collaborators
//! by signature without those drivers ever touching `aurora_acpi` directly.

use core::sync::atomic::{AtomicPtr, Ordering};

use aurora_acpi::rsdt::find_table;
use aurora_acpi::sdt::SdtHeader;
use aurora_acpi::{Rsdp, RsdpError};
use aurora_core::addr::PhysAddr;
use aurora_core::sync::SpinLock;

/// Maps a physical address to the bytes stored there, for however many
/// bytes the caller asked for, or `None` if nothing is mapped at that
/// address. Installed once during boot via [`set_translator`]; the same
/// tagged-function-pointer pattern `drivers::irq` and `ke::ipi` use instead
/// of a trait object, since this runs before any allocator exists.
pub type Translator = fn(PhysAddr, usize) -> Option<&'static [u8]>;

static TRANSLATOR: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Installs the physical-to-virtual translation function `boot` uses to
/// read ACPI tables out of whatever mapping is active at the time.
pub fn set_translator(translator: Translator) {
    TRANSLATOR.store(translator as *mut (), Ordering::Release);
}

fn translate(addr: PhysAddr, len: usize) -> Option<&'static [u8]> {
    let raw = TRANSLATOR.load(Ordering::Acquire);
    if raw.is_null() {
        return None;
    }
    // SAFETY: only ever stored by `set_translator` from a value of type
    // `Translator`.
    let f: Translator = unsafe { core::mem::transmute::<*mut (), Translator>(raw) };
    f(addr, len)
}

struct RootTables {
    rsdt_address: PhysAddr,
    xsdt_address: Option<PhysAddr>,
}

static ROOT: SpinLock<Option<RootTables>> = SpinLock::new(None);

/// Errors [`init`] can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcpiInitError {
    /// The RSDP the loader block pointed at failed validation.
    Rsdp(RsdpError),
    /// No translator has been installed yet, or it could not map the RSDP.
    NoMapping,
}

/// Validates the RSDP at `rsdp_phys` and records its RSDT/XSDT address for
/// later [`find_table`](self::find_table) lookups.
///
/// # Errors
///
/// See [`AcpiInitError`].
pub fn init(rsdp_phys: PhysAddr) -> Result<(), AcpiInitError> {
    let bytes = translate(rsdp_phys, 36).ok_or(AcpiInitError::NoMapping)?;
    let rsdp = Rsdp::parse(bytes).map_err(AcpiInitError::Rsdp)?;
    *ROOT.lock() = Some(RootTables {
        rsdt_address: rsdp.rsdt_address,
        xsdt_address: rsdp.xsdt_address,
    });
    Ok(())
}

/// Looks up a table's physical address by its 4-byte signature, e.g.
/// `*b"APIC"` for the MADT.
///
/// Returns `None` if [`init`] has not run, the table is absent, or the
/// translator cannot map a candidate entry.
#[must_use]
pub fn find_table_by_signature(signature: [u8; 4]) -> Option<PhysAddr> {
    let root = ROOT.lock();
    let root = root.as_ref()?;
    let (root_addr, is_xsdt) = match root.xsdt_address {
        Some(addr) => (addr, true),
        None => (root.rsdt_address, false),
    };
    let header_bytes = translate(root_addr, SdtHeader::SIZE)?;
    let header = SdtHeader::read_from(header_bytes)?;
    let body_len = (header.length as usize).checked_sub(SdtHeader::SIZE)?;
    let body_addr = PhysAddr::new(root_addr.as_u64() + SdtHeader::SIZE as u64);
    let body = translate(body_addr, body_len)?;
    find_table(body, is_xsdt, signature, |addr| {
        translate(addr, SdtHeader::SIZE).and_then(|b| SdtHeader::read_from(b)).map(|h| h.signature)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    fn sdt_header_bytes(signature: [u8; 4], length: u32) -> [u8; 36] {
        let mut buf = [0u8; 36];
        buf[0..4].copy_from_slice(&signature);
        buf[4..8].copy_from_slice(&length.to_le_bytes());
        buf
    }

    fn rsdp_v1_bytes(rsdt_addr: u32) -> [u8; 20] {
        let mut buf = [0u8; 20];
        buf[0..8].copy_from_slice(b"RSD PTR ");
        buf[16..20].copy_from_slice(&rsdt_addr.to_le_bytes());
        let sum = buf.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        buf[8] = buf[8].wrapping_sub(sum);
        buf
    }

    static RSDP_STORAGE: StdMutex<Option<[u8; 20]>> = StdMutex::new(None);
    static RSDT_HEADER_STORAGE: StdMutex<Option<[u8; 36]>> = StdMutex::new(None);

    fn fake_translate(addr: PhysAddr, _len: usize) -> Option<&'static [u8]> {
        if addr == PhysAddr::new(0x1000) {
            let guard = RSDP_STORAGE.lock().unwrap();
            let bytes = guard.as_ref()?;
            let leaked: &'static [u8; 20] = Box::leak(Box::new(*bytes));
            return Some(leaked);
        }
        if addr == PhysAddr::new(0x2000) {
            let guard = RSDT_HEADER_STORAGE.lock().unwrap();
            let bytes = guard.as_ref()?;
            let leaked: &'static [u8; 36] = Box::leak(Box::new(*bytes));
            return Some(leaked);
        }
        None
    }

    #[test]
    fn init_fails_without_a_translator() {
        let _guard = TEST_LOCK.lock().unwrap();
        TRANSLATOR.store(core::ptr::null_mut(), Ordering::Release);
        let err = init(PhysAddr::new(0x1000)).unwrap_err();
        assert_eq!(err, AcpiInitError::NoMapping);
    }

    #[test]
    fn init_validates_and_records_rsdt_address() {
        let _guard = TEST_LOCK.lock().unwrap();
        *RSDP_STORAGE.lock().unwrap() = Some(rsdp_v1_bytes(0x2000));
        *RSDT_HEADER_STORAGE.lock().unwrap() = Some(sdt_header_bytes(*b"RSDT", 36));
        set_translator(fake_translate);
        assert!(init(PhysAddr::new(0x1000)).is_ok());
        TRANSLATOR.store(core::ptr::null_mut(), Ordering::Release);
    }
}
