//! Shared logging primitives: severity levels, a borrowed log record, and
//! the [`LogSink`] trait every log backend implements.
//!
//! This crate only defines the vocabulary. The two-phase logger described in
//! the project's ambient stack — an early, lock-free, allocation-free serial
//! path active before the pool allocator exists, and a full fan-out registry
//! of [`LogSink`]s once it is — lives in `aurora-kernel::log`, since it needs
//! real hardware backends (serial port, framebuffer console) this crate does
//! not have access to. Keeping the vocabulary here lets both the early path
//! and the full registry agree on one [`Level`] and one record shape.

use core::fmt;

/// Log severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    /// Fine-grained diagnostic detail, off by default.
    Trace = 0,
    /// Developer-facing detail useful while bringing up a subsystem.
    Debug = 1,
    /// Routine operational messages.
    Info = 2,
    /// Recoverable anomalies worth a human's attention.
    Warn = 3,
    /// A fault serious enough to precede `fatal_error`, or report one that
    /// was contained.
    Error = 4,
}

impl Level {
    /// Returns the single-letter tag used in the log line prefix.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Trace => "T",
            Self::Debug => "D",
            Self::Info => "I",
            Self::Warn => "W",
            Self::Error => "E",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// A single log event, borrowed for the duration of the call into every
/// registered [`LogSink`].
///
/// `args` is `core::fmt::Arguments` rather than a formatted `String` — there
/// is no allocator guaranteed to exist at the point most log calls happen
/// (early boot, above `DISPATCH` IRQL, inside the panic path), so formatting
/// is deferred to whatever sink actually needs bytes (typically writing
/// through `core::fmt::Write` directly onto a serial port or framebuffer).
pub struct Record<'a> {
    /// Severity of this event.
    pub level: Level,
    /// Short static name of the emitting module (e.g. `"mm::pmm"`).
    pub target: &'a str,
    /// The formatted message, still lazy.
    pub args: fmt::Arguments<'a>,
    /// Logical CPU the record was produced on, or `None` before per-CPU
    /// storage is initialized.
    pub cpu: Option<u32>,
}

/// A destination for log records.
///
/// Implementations must not allocate and must be safe to call from any
/// IRQL the logging macros are used at, including inside the panic path —
/// a sink that itself panics or deadlocks turns a diagnostic message into a
/// second, worse failure.
pub trait LogSink: Send + Sync {
    /// Writes one record to this sink. Must not block indefinitely; a sink
    /// backed by a lock should use a try-lock and drop the record rather
    /// than risk a reentrant deadlock (e.g. a log call made while already
    /// holding that sink's lock, which happens routinely inside `fatal_error`).
    fn write_record(&self, record: &Record<'_>);

    /// The minimum level this sink accepts; records below it are dropped
    /// before `write_record` is called. Defaults to accepting everything.
    fn min_level(&self) -> Level {
        Level::Trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        count: AtomicUsize,
        min: Level,
    }

    impl LogSink for CountingSink {
        fn write_record(&self, _record: &Record<'_>) {
            self.count.fetch_add(1, Ordering::Relaxed);
        }

        fn min_level(&self) -> Level {
            self.min
        }
    }

    #[test]
    fn level_ordering_is_severity_order() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn level_tag_is_single_letter() {
        assert_eq!(Level::Error.tag(), "E");
        assert_eq!(Level::Info.tag(), "I");
    }

    #[test]
    fn sink_receives_record() {
        let sink = CountingSink {
            count: AtomicUsize::new(0),
            min: Level::Trace,
        };
        let record = Record {
            level: Level::Info,
            target: "test",
            args: format_args!("hello"),
            cpu: Some(0),
        };
        sink.write_record(&record);
        assert_eq!(sink.count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn default_min_level_accepts_trace() {
        let sink = CountingSink {
            count: AtomicUsize::new(0),
            min: Level::Trace,
        };
        assert_eq!(sink.min_level(), Level::Trace);
    }
}
