//! Two-phase kernel logger built on the vocabulary in
//! [`aurora_core::log`].
//!
//! Phase one runs from the earliest boot instructions: [`EarlySerialSink`]
//! writes straight to the COM1 UART with no allocation and no dependency on
//! anything other than port I/O, so a log call made before the page
//! database exists still reaches a screen somewhere. Phase two begins once
//! a driver registers additional sinks (a framebuffer console, a debug
//! network transport) through [`register_sink`]; `dispatch` then fans every
//! record out to all registered sinks, the early serial sink included.
//!
//! The registry itself is a fixed-capacity array behind an
//! [`IrqlSpinLock`](crate::sync::IrqlSpinLock) rather than anything
//! allocating, so logging stays legal at any IRQL the macros are used at,
//! panic path included.

use core::fmt::{self, Write};

use aurora_core::cpu_local::{current_cpu_id, cpu_is_initialized};
pub use aurora_core::log::{Level, LogSink, Record};
use aurora_noalloc::vec::ArrayVec;

use crate::irql::Irql;
use crate::sync::IrqlSpinLock;

/// Maximum number of sinks the registry can hold at once.
const MAX_SINKS: usize = 8;

/// Error returned by [`register_sink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryFull;

static SINKS: IrqlSpinLock<ArrayVec<&'static dyn LogSink, MAX_SINKS>> =
    IrqlSpinLock::new(ArrayVec::new());

/// Registers an additional log sink. Order of registration is the order
/// `dispatch` fans records out to sinks.
///
/// # Errors
///
/// Returns [`RegistryFull`] if [`MAX_SINKS`] sinks are already registered.
pub fn register_sink(sink: &'static dyn LogSink) -> Result<(), RegistryFull> {
    let mut sinks = SINKS.acquire_and_raise(Irql::DISPATCH);
    sinks.try_push(sink).map_err(|_| RegistryFull)
}

/// Formats and delivers one record to every registered sink whose
/// `min_level` admits it. Called by the `kprintln!`/`kdebug!`/`kwarn!`/
/// `kerror!` macros; not normally called directly.
pub fn dispatch(level: Level, target: &str, args: fmt::Arguments<'_>) {
    let cpu = cpu_is_initialized().then(current_cpu_id);
    let record = Record { level, target, args, cpu };
    let sinks = SINKS.acquire_and_raise(Irql::DISPATCH);
    for sink in sinks.iter() {
        if record.level >= sink.min_level() {
            sink.write_record(&record);
        }
    }
}

/// Writes a formatted record as one line: `[cpuN][L] target: message`, or
/// `[boot][L] target: message` before per-CPU storage exists. Shared by
/// every byte-oriented sink ([`EarlySerialSink`] and any console sink a
/// driver registers) so their output lines up.
pub fn format_line<W: Write>(out: &mut W, record: &Record<'_>) -> fmt::Result {
    match record.cpu {
        Some(cpu) => write!(out, "[cpu{cpu}][{}] {}: ", record.level.tag(), record.target)?,
        None => write!(out, "[boot][{}] {}: ", record.level.tag(), record.target)?,
    }
    out.write_fmt(record.args)?;
    out.write_char('\n')
}

/// The serial port conventionally wired to the earliest boot console
/// (COM1, I/O port 0x3F8).
const COM1_PORT: u16 = 0x3F8;

/// Writes every record straight to the COM1 UART, one byte at a time, with
/// no buffering. This is the only sink guaranteed to exist before a driver
/// has registered anything else.
pub struct EarlySerialSink;

/// The always-registered early serial sink instance.
pub static EARLY_SERIAL: EarlySerialSink = EarlySerialSink;

impl LogSink for EarlySerialSink {
    fn write_record(&self, record: &Record<'_>) {
        let mut writer = SerialWriter;
        let _ = format_line(&mut writer, record);
    }
}

struct SerialWriter;

impl Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        #[cfg(all(target_os = "none", target_arch = "x86_64"))]
        {
            let port = crate::arch::x86_64::instructions::Port8::new(COM1_PORT);
            for byte in s.bytes() {
                // SAFETY: COM1's data register is safe to write arbitrary
                // bytes to; a byte with no receiving terminal is simply lost.
                unsafe { port.write(byte) };
            }
        }
        #[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
        {
            let _ = s;
        }
        Ok(())
    }
}

/// Installs the early serial sink. Idempotent beyond [`MAX_SINKS`]: called
/// once from [`crate::boot::init`] before any other subsystem logs.
pub fn init_early() {
    let _ = register_sink(&EARLY_SERIAL);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    // Every test shares the same process-global SINKS registry (and the
    // irql.rs CURRENT_IRQL slot it acquires through), so serialize.
    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    struct CountingSink(AtomicUsize);

    impl LogSink for CountingSink {
        fn write_record(&self, _record: &Record<'_>) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn format_line_includes_target_and_message() {
        let mut out = String::new();
        let record = Record {
            level: Level::Warn,
            target: "mm::pmm",
            args: format_args!("low on pages: {}", 3),
            cpu: Some(2),
        };
        format_line(&mut out, &record).unwrap();
        assert_eq!(out, "[cpu2][W] mm::pmm: low on pages: 3\n");
    }

    #[test]
    fn format_line_reports_boot_before_cpu_known() {
        let mut out = String::new();
        let record = Record {
            level: Level::Info,
            target: "boot",
            args: format_args!("hello"),
            cpu: None,
        };
        format_line(&mut out, &record).unwrap();
        assert_eq!(out, "[boot][I] boot: hello\n");
    }

    static COUNTER: CountingSink = CountingSink(AtomicUsize::new(0));

    #[test]
    fn dispatch_reaches_registered_sinks() {
        let _serial = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let _ = crate::irql::lower(Irql::PASSIVE);
        // Registered once for the lifetime of this test binary; MAX_SINKS
        // leaves ample headroom for the single counting sink this suite adds.
        let _ = register_sink(&COUNTER);
        let before = COUNTER.0.load(Ordering::Relaxed);
        dispatch(Level::Info, "test", format_args!("hi"));
        assert_eq!(COUNTER.0.load(Ordering::Relaxed), before + 1);
    }
}
