//! The panic path (spec §4.9, §7 category 2): "programmer bugs that cannot
//! be recovered from," always funnelled through [`fatal_error`].
//!
//! On the kernel target this disables preemption, broadcasts a freeze IPI
//! so every other CPU halts, takes the video lock unconditionally (spec
//! §5: "acquisition during panic bypasses the lock — panic assumes the
//! world is frozen"), prints the code, its four parameters, and a
//! symbolised stack trace, then halts forever. On the host test target
//! there is no hardware to freeze or halt, so it reports the same
//! information through a plain `panic!`, which is what every
//! `#[should_panic]` test in this crate asserts against.

use core::fmt::Write;

use aurora_core::panic_code::PanicCode;

use crate::backtrace::{self, Context};
use crate::drivers::early_console::{Color, CONSOLE};

/// Disables preemption, freezes every other CPU, prints the panic report,
/// and halts. Never returns.
pub fn fatal_error(code: PanicCode, p1: u64, p2: u64, p3: u64, p4: u64) -> ! {
    #[cfg(all(target_os = "none", target_arch = "x86_64"))]
    {
        crate::arch::x86_64::instructions::disable_interrupts();
        crate::ke::ipi::freeze_other_cpus();
        print_report(code, p1, p2, p3, p4);
        loop {
            crate::arch::x86_64::instructions::halt();
        }
    }
    #[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
    {
        panic!("{code}: params=[{p1:#x}, {p2:#x}, {p3:#x}, {p4:#x}]");
    }
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
fn print_report(code: PanicCode, p1: u64, p2: u64, p3: u64, p4: u64) {
    // SAFETY: the panic path is the one place the console's ordinary lock
    // is deliberately bypassed — by the time we get here every other CPU
    // is spinning in a halt loop and will never touch the console again.
    unsafe {
        CONSOLE.force_set_color(Color::Panic);
        CONSOLE.force_put_string("\n*** KERNEL PANIC ***\n");
        let mut line = FixedLineBuf::new();
        let _ = write!(line, "code: {code}\n");
        CONSOLE.force_put_string(line.as_str());
        line.clear();
        let _ = write!(line, "params: {p1:#018x} {p2:#018x} {p3:#018x} {p4:#018x}\n");
        CONSOLE.force_put_string(line.as_str());

        CONSOLE.force_put_string("stack trace:\n");
        let ctx = current_context();
        let trace = backtrace::capture_stack_trace(ctx, backtrace::MAX_FRAMES);
        for addr in trace.as_slice() {
            line.clear();
            let _ = write!(line, "  {addr:?}\n");
            CONSOLE.force_put_string(line.as_str());
        }
    }
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
fn current_context() -> Context {
    let rbp: u64;
    // SAFETY: reads the current frame pointer only; no side effects.
    unsafe {
        core::arch::asm!("mov {}, rbp", out(reg) rbp, options(nomem, nostack, preserves_flags));
    }
    Context {
        pc: aurora_core::addr::VirtAddr::new_truncate(current_context as usize as u64),
        frame_pointer: aurora_core::addr::VirtAddr::new_truncate(rbp),
    }
}

/// A small `core::fmt::Write` sink over a fixed stack buffer, since the
/// panic path must not allocate. Long enough for one panic report line;
/// longer writes are silently truncated rather than panicking again.
#[cfg(all(target_os = "none", target_arch = "x86_64"))]
struct FixedLineBuf {
    buf: [u8; 128],
    len: usize,
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
impl FixedLineBuf {
    fn new() -> Self {
        Self { buf: [0; 128], len: 0 }
    }

    fn clear(&mut self) {
        self.len = 0;
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
impl Write for FixedLineBuf {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let space = self.buf.len() - self.len;
        let take = s.len().min(space);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "bad-pool-header")]
    fn fatal_error_reports_the_panic_code() {
        fatal_error(PanicCode::BadPoolHeader, 1, 2, 3, 4);
    }

    #[test]
    #[should_panic(expected = "0x1")]
    fn fatal_error_reports_parameters() {
        fatal_error(PanicCode::BadObjectHeader, 0x1, 0, 0, 0);
    }
}
