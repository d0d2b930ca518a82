//! Local APIC: per-CPU interrupt controller, IPI sender, and task-priority
//! gate for the IRQL ladder (spec §4.2, §4.6).
//!
//! Grounded in the teacher's `hw/local_apic.rs` register map (same offsets,
//! same fields), with direct volatile MMIO access in place of the teacher's
//! `hadron_mmio::register_block!` macro, since this tree carries no
//! equivalent dependency.

use core::sync::atomic::{AtomicU64, Ordering};

use aurora_core::addr::VirtAddr;

const REG_ID: usize = 0x020;
const REG_VERSION: usize = 0x030;
const REG_TPR: usize = 0x080;
const REG_EOI: usize = 0x0B0;
const REG_SVR: usize = 0x0F0;
const REG_ICR_LOW: usize = 0x300;
const REG_ICR_HIGH: usize = 0x310;
const REG_LVT_TIMER: usize = 0x320;
const REG_TIMER_INITIAL: usize = 0x380;
const REG_TIMER_CURRENT: usize = 0x390;
const REG_TIMER_DIVIDE: usize = 0x3E0;

const SVR_ENABLE: u32 = 1 << 8;
const TIMER_PERIODIC: u32 = 1 << 17;
const TIMER_MASKED: u32 = 1 << 16;
const ICR_DELIVERY_PENDING: u32 = 1 << 12;

/// MSR address for the APIC base (used to confirm xAPIC mode during boot;
/// this driver only ever targets the memory-mapped xAPIC interface).
pub const IA32_APIC_BASE_MSR: u32 = 0x1B;

/// Virtual address the Local APIC's MMIO page is mapped at. Set once by
/// [`init`]; every other function in this module assumes it is valid.
static BASE: AtomicU64 = AtomicU64::new(0);

fn base() -> VirtAddr {
    VirtAddr::new_truncate(BASE.load(Ordering::Relaxed))
}

fn read_reg(offset: usize) -> u32 {
    // SAFETY: `base()` is a live LAPIC MMIO mapping once `init` has run;
    // every register this module touches is 4-byte aligned and within the
    // one mapped page.
    unsafe { core::ptr::read_volatile((base().as_u64() as usize + offset) as *const u32) }
}

fn write_reg(offset: usize, value: u32) {
    // SAFETY: see `read_reg`.
    unsafe { core::ptr::write_volatile((base().as_u64() as usize + offset) as *mut u32, value) }
}

/// Records the MMIO base and enables the Local APIC with `spurious_vector`.
///
/// # Safety
///
/// `virt_base` must be a valid mapping of the running CPU's Local APIC MMIO
/// region (at least 4 KiB), and must be called once per CPU before any other
/// function in this module.
pub unsafe fn init(virt_base: VirtAddr, spurious_vector: u8) {
    BASE.store(virt_base.as_u64(), Ordering::Relaxed);
    write_reg(REG_SVR, SVR_ENABLE | u32::from(spurious_vector));
}

/// This CPU's Local APIC ID, used as the spec's logical [`aurora_core::id::CpuId`]
/// source of truth during AP bring-up.
#[must_use]
pub fn id() -> u8 {
    ((read_reg(REG_ID) >> 24) & 0xFF) as u8
}

/// The Local APIC hardware version.
#[must_use]
pub fn version() -> u32 {
    read_reg(REG_VERSION)
}

/// Signals end-of-interrupt to the controller, re-arming it to deliver the
/// next pending vector at or below the current priority.
pub fn send_eoi() {
    write_reg(REG_EOI, 0);
}

/// Sets the Task Priority Register, gating which vectors the controller
/// will deliver: only vectors with priority strictly greater than `tpr`
/// (spec §4.2's `can_deliver`). Called by [`crate::irql::raise`]/`lower`.
pub fn set_task_priority(irql: u8) {
    // The APIC's priority class is the top 4 bits of an 8-bit value; IRQL's
    // 0..=15 range maps directly onto it.
    write_reg(REG_TPR, u32::from(irql) << 4);
}

/// Starts the periodic timer, used as the platform's clock-tick source
/// (spec §4.6, `TICK_PERIOD_NANOS`).
pub fn start_periodic_timer(vector: u8, initial_count: u32, divide: u8) {
    write_reg(REG_TIMER_DIVIDE, divide_config(divide));
    write_reg(REG_LVT_TIMER, TIMER_PERIODIC | u32::from(vector));
    write_reg(REG_TIMER_INITIAL, initial_count);
}

/// Masks the timer LVT entry, stopping further timer interrupts.
pub fn stop_timer() {
    write_reg(REG_LVT_TIMER, TIMER_MASKED);
}

/// The timer's current countdown value.
#[must_use]
pub fn timer_current_count() -> u32 {
    read_reg(REG_TIMER_CURRENT)
}

fn divide_config(divide: u8) -> u32 {
    match divide {
        1 => 0b1011,
        2 => 0b0000,
        4 => 0b0001,
        8 => 0b0010,
        16 => 0b0011,
        32 => 0b1000,
        64 => 0b1001,
        _ => 0b1010, // 128
    }
}

/// Sends a fixed-vector interrupt to `apic_id`, blocking until the write is
/// accepted by the bus (spec §4.6 IPI: "hardware-level send").
pub fn send_ipi(apic_id: u8, vector: u8) {
    while read_reg(REG_ICR_LOW) & ICR_DELIVERY_PENDING != 0 {
        core::hint::spin_loop();
    }
    write_reg(REG_ICR_HIGH, u32::from(apic_id) << 24);
    write_reg(REG_ICR_LOW, u32::from(vector));
}

/// Sends the INIT-SIPI-SIPI sequence that starts an application processor,
/// with `start_page` as the 4 KiB-aligned real-mode trampoline address.
///
/// # Safety
///
/// `apic_id` must name an idle application processor and `start_page` must
/// hold a valid real-mode entry trampoline.
pub unsafe fn start_application_processor(apic_id: u8, start_page: u8) {
    const INIT: u32 = 0b101 << 8;
    const STARTUP: u32 = 0b110 << 8;
    const LEVEL_ASSERT: u32 = 1 << 14;

    write_reg(REG_ICR_HIGH, u32::from(apic_id) << 24);
    write_reg(REG_ICR_LOW, INIT | LEVEL_ASSERT);
    for _ in 0..2 {
        write_reg(REG_ICR_HIGH, u32::from(apic_id) << 24);
        write_reg(REG_ICR_LOW, STARTUP | LEVEL_ASSERT | u32::from(start_page));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divide_config_covers_every_named_ratio() {
        assert_eq!(divide_config(1), 0b1011);
        assert_eq!(divide_config(2), 0b0000);
        assert_eq!(divide_config(128), 0b1010);
    }
}
