//! GS-based per-CPU data block.
//!
//! [`aurora_core::cpu_local`] reads the running CPU's id and init state
//! straight out of `GS:[24]`/`GS:[0]`/`GS:[29]` without any notion of who
//! put them there. This module is the one place that sets `IA32_GS_BASE`
//! to a block matching that layout exactly, once per CPU during bring-up.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::arch::x86_64::instructions::wrmsr;
use crate::config::MAX_CPUS;

/// MSR holding the base address `GS`-relative accesses are relative to.
const IA32_GS_BASE: u32 = 0xC000_0101;

/// Matches the byte offsets `aurora_core::cpu_local` documents: self-pointer
/// at 0, `cpu_id` at 24, `initialized` at 29.
#[repr(C)]
struct PerCpu {
    self_ptr: *const PerCpu,
    _reserved0: [u8; 16],
    cpu_id: AtomicU32,
    _reserved1: u8,
    initialized: AtomicU8,
}

const fn static_assert_layout() {
    assert!(core::mem::offset_of!(PerCpu, self_ptr) == 0);
    assert!(core::mem::offset_of!(PerCpu, cpu_id) == 24);
    assert!(core::mem::offset_of!(PerCpu, initialized) == 29);
}

static_assert_layout();

impl PerCpu {
    const fn new() -> Self {
        Self {
            self_ptr: core::ptr::null(),
            _reserved0: [0; 16],
            cpu_id: AtomicU32::new(0),
            _reserved1: 0,
            initialized: AtomicU8::new(0),
        }
    }
}

// SAFETY: each block is only ever written by the CPU it belongs to, from
// `init` below, before that CPU's GS base points at it; no other CPU
// touches another's block.
unsafe impl Sync for PerCpu {}

static mut PERCPU_BLOCKS: [PerCpu; MAX_CPUS] = [const { PerCpu::new() }; MAX_CPUS];

/// Points this CPU's `GS` base at its per-CPU block and marks it
/// initialized.
///
/// # Safety
///
/// Must run once per CPU, after segment registers are reloaded (a null
/// `GS` selector load clears `GS_BASE`, so this must follow
/// [`super::gdt::init`], not precede it) and before any code on this CPU
/// reads [`aurora_core::cpu_local::current_cpu_id`].
pub unsafe fn init(cpu_id: u32) {
    // SAFETY: `cpu_id` is caller-guaranteed to be this CPU's own id and
    // `< MAX_CPUS`; no other CPU indexes this slot.
    unsafe {
        let block = core::ptr::addr_of_mut!(PERCPU_BLOCKS)
            .cast::<PerCpu>()
            .add(cpu_id as usize);
        (*block).self_ptr = block;
        (*block).cpu_id.store(cpu_id, Ordering::Relaxed);
        wrmsr(IA32_GS_BASE, block as u64);
        (*block).initialized.store(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_cpu_local_offsets() {
        assert_eq!(core::mem::offset_of!(PerCpu, self_ptr), 0);
        assert_eq!(core::mem::offset_of!(PerCpu, cpu_id), 24);
        assert_eq!(core::mem::offset_of!(PerCpu, initialized), 29);
    }
}
