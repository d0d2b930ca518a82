//! The video text surface (spec §6): "a line-buffered console exposes
//! `put_char`, `put_string`, and `set_color`. The core does not specify
//! glyph rendering."
//!
//! Glyph rendering onto the loader-provided framebuffer is an external
//! collaborator's concern; this module only owns the contract itself —
//! cursor/color state plus a byte sink. On the kernel target that sink is
//! the COM1 UART, the same transport [`crate::log::EarlySerialSink`] writes
//! to, so console output and early log lines interleave on one visible
//! stream before a framebuffer-backed [`crate::log::LogSink`] is ever
//! registered.

use aurora_core::sync::SpinLock;

/// Foreground color a caller can request via [`EarlyConsole::set_color`].
/// The spec puts glyph rendering out of scope, so this is bookkeeping a
/// future framebuffer backend would consult, not something rendered here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// Normal operating output.
    Default,
    /// The colors `fatal_error` switches to before printing its report
    /// (spec §4.9: "switches to panic colours").
    Panic,
}

struct ConsoleState {
    color: Color,
}

/// A line-buffered text console with a single owning spin lock (spec §5:
/// "the video buffer... each have a single owning spin lock").
pub struct EarlyConsole {
    state: SpinLock<ConsoleState>,
}

/// The single early console instance, shared by every subsystem that logs
/// or prints before a richer console driver exists.
pub static CONSOLE: EarlyConsole = EarlyConsole {
    state: SpinLock::new(ConsoleState { color: Color::Default }),
};

impl EarlyConsole {
    /// Writes one character.
    pub fn put_char(&self, c: u8) {
        let _guard = self.state.lock();
        write_byte(c);
    }

    /// Writes a string, one byte at a time.
    pub fn put_string(&self, s: &str) {
        let _guard = self.state.lock();
        for byte in s.bytes() {
            write_byte(byte);
        }
    }

    /// Sets the foreground color for subsequent output.
    pub fn set_color(&self, color: Color) {
        let mut state = self.state.lock();
        state.color = color;
    }

    /// Writes a string without acquiring the console lock.
    ///
    /// # Safety
    ///
    /// Only sound when the caller can guarantee no other CPU will ever
    /// touch this console again — true exactly once other CPUs have been
    /// frozen by [`crate::ke::ipi::freeze_other_cpus`], matching spec §5's
    /// "acquisition during panic bypasses the lock."
    pub unsafe fn force_put_string(&self, s: &str) {
        for byte in s.bytes() {
            write_byte(byte);
        }
    }

    /// Sets the color without acquiring the console lock; same contract as
    /// [`force_put_string`](Self::force_put_string).
    ///
    /// # Safety
    ///
    /// Same contract as [`force_put_string`](Self::force_put_string).
    pub unsafe fn force_set_color(&self, color: Color) {
        // SAFETY: forwarded to the caller; `force_get` is the documented
        // panic-path escape hatch for this same reason.
        unsafe {
            self.state.force_get().color = color;
        }
    }
}

const COM1_PORT: u16 = 0x3F8;

fn write_byte(byte: u8) {
    #[cfg(all(target_os = "none", target_arch = "x86_64"))]
    {
        let port = crate::arch::x86_64::instructions::Port8::new(COM1_PORT);
        // SAFETY: COM1's data register accepts arbitrary bytes.
        unsafe { port.write(byte) };
    }
    #[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
    {
        let _ = byte;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_string_and_set_color_do_not_panic_on_host() {
        CONSOLE.set_color(Color::Panic);
        CONSOLE.put_string("hello\n");
        CONSOLE.set_color(Color::Default);
    }
}
