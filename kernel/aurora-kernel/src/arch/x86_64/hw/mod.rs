//! Arch-critical hardware drivers: the Local APIC, I/O APIC, and TSC.
//!
//! Mirrors the teacher's `arch/x86_64/hw` split, trimmed to the controllers
//! [`crate::irql`] and the clock/IPI paths actually drive; the PIT/PIC/HPET
//! legacy timers the teacher also carries are out of scope (this platform
//! assumes APIC-capable hardware, per spec §9 Design Notes).

pub mod io_apic;
pub mod local_apic;
pub mod tsc;
