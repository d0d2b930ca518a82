//! Time Stamp Counter reads, used to calibrate the Local APIC timer divisor
//! against wall-clock time during boot (spec §4.6).

/// Reads the TSC with `RDTSC`. Not serializing: the CPU may reorder this
/// relative to surrounding instructions.
#[inline]
#[must_use]
pub fn read_tsc() -> u64 {
    let lo: u32;
    let hi: u32;
    // SAFETY: RDTSC is available on every x86_64 processor and has no side
    // effects.
    unsafe {
        core::arch::asm!(
            "rdtsc",
            out("eax") lo,
            out("edx") hi,
            options(nomem, nostack, preserves_flags),
        );
    }
    (u64::from(hi) << 32) | u64::from(lo)
}

/// Reads the TSC with `RDTSCP`, which is serializing, also returning the
/// value of `IA32_TSC_AUX` (typically the logical processor number).
#[inline]
#[must_use]
pub fn read_tscp() -> (u64, u32) {
    let lo: u32;
    let hi: u32;
    let aux: u32;
    // SAFETY: RDTSCP is available on every processor this kernel targets
    // and has no side effects.
    unsafe {
        core::arch::asm!(
            "rdtscp",
            out("eax") lo,
            out("edx") hi,
            out("ecx") aux,
            options(nomem, nostack, preserves_flags),
        );
    }
    ((u64::from(hi) << 32) | u64::from(lo), aux)
}
