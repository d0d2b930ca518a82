//! Saved thread register state and the context switch itself (spec §4.7:
//! "A context switch is a pure register save/restore plus a stack-pointer
//! swap; it holds no scheduling policy").

use aurora_core::addr::VirtAddr;

/// Callee-saved integer registers plus the stack pointer, saved across a
/// voluntary context switch.
///
/// Laid out to match the order `switch_to`'s inline assembly pushes them in:
/// first pushed is last in the struct, so the stack-resident snapshot and
/// this struct agree on field order without per-field offsets.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ContextFrame {
    /// Saved r15.
    pub r15: u64,
    /// Saved r14.
    pub r14: u64,
    /// Saved r13.
    pub r13: u64,
    /// Saved r12.
    pub r12: u64,
    /// Saved rbx.
    pub rbx: u64,
    /// Saved rbp.
    pub rbp: u64,
    /// Return address the switch resumes at (the thread's entry trampoline
    /// on first switch-in, or wherever it last called `switch_to` from).
    pub return_address: u64,
}

impl ContextFrame {
    /// A zeroed frame, used only as a placeholder before
    /// [`new_initial`](Self::new_initial) lays down a real one.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbx: 0,
            rbp: 0,
            return_address: 0,
        }
    }

    /// Builds the frame a brand-new thread's stack starts with: nothing
    /// callee-saved to restore, and `return_address` pointing at the entry
    /// trampoline so the first `switch_to` into this thread "returns" into
    /// its entry point instead of a real caller.
    #[must_use]
    pub const fn new_initial(entry_trampoline: VirtAddr) -> Self {
        Self {
            return_address: entry_trampoline.as_u64(),
            ..Self::zeroed()
        }
    }
}

/// Switches from `from`'s context onto `to`'s, and returns only when some
/// later switch resumes `from`.
///
/// # Safety
///
/// Both pointers must reference a `ContextFrame` sitting at the top of a
/// valid, currently-unused-by-anyone-else kernel stack for their respective
/// thread. Neither thread may be concurrently switched into by another CPU.
#[cfg(all(target_os = "none", target_arch = "x86_64"))]
#[inline(never)]
pub unsafe extern "C" fn switch_to(from: *mut ContextFrame, to: *const ContextFrame) {
    // SAFETY: forwarded to the caller; the asm block only ever touches the
    // two stack slots `from`/`to` point at and the callee-saved registers
    // the calling convention already requires `switch_to` to preserve.
    unsafe {
        core::arch::asm!(
            "push rbp",
            "push rbx",
            "push r12",
            "push r13",
            "push r14",
            "push r15",
            "mov [rdi], rsp",
            "mov rsp, rsi",
            "pop r15",
            "pop r14",
            "pop r13",
            "pop r12",
            "pop rbx",
            "pop rbp",
            "ret",
            in("rdi") from,
            in("rsi") to,
            options(noreturn),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_frame_carries_entry_as_return_address() {
        let entry = VirtAddr::new_truncate(0xFFFF_8000_0010_0000);
        let frame = ContextFrame::new_initial(entry);
        assert_eq!(frame.return_address, entry.as_u64());
        assert_eq!(frame.rbp, 0);
        assert_eq!(frame.r15, 0);
    }
}
