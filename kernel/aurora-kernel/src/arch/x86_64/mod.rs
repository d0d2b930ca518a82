//! x86-64 hardware abstraction layer.

pub mod context;
pub mod gdt;
pub mod hw;
pub mod idt;
pub mod instructions;
pub mod percpu;

use aurora_core::addr::VirtAddr;

/// Vector the Local APIC's spurious-interrupt register is programmed with.
/// Outside the dynamic/device vector range and distinct from
/// [`idt::CLOCK_VECTOR`]/[`idt::IPI_VECTOR`], so a spurious delivery is
/// unambiguous in a vector dump.
const SPURIOUS_VECTOR: u8 = 0xFF;

/// Placeholder LAPIC timer divide-by and initial-count pair.
///
/// There is no PIT/HPET driver anywhere in this tree to calibrate the
/// timer's frequency against (see [`hw::local_apic`]'s own doc comment:
/// this platform assumes APIC-capable hardware and carries no legacy
/// timers), so these values are a fixed guess rather than a measured one.
/// A real calibration pass belongs here once a reference clock exists.
const TIMER_DIVIDE: u8 = 16;
const TIMER_INITIAL_COUNT: u32 = 1_000_000;

/// Brings the boot processor's low-level state up to where the rest of the
/// kernel can run: GDT, IDT, per-CPU GS base, then the Local APIC in
/// xAPIC/software-enabled mode with its periodic timer armed.
///
/// # Safety
///
/// Must run exactly once, early in boot, before any interrupt can fire and
/// before any other CPU is started.
pub unsafe fn init_boot_processor() {
    // SAFETY: called once, before interrupts are enabled. `percpu::init`
    // runs after `gdt::init` reloads segment registers, since a null `GS`
    // selector load clears `GS_BASE`.
    unsafe {
        gdt::init();
        idt::init();
        percpu::init(0);

        let apic_base_msr = instructions::rdmsr(hw::local_apic::IA32_APIC_BASE_MSR);
        let apic_phys = apic_base_msr & 0xFFFF_F000;
        // No physical-to-virtual translator exists in this tree; the Local
        // APIC's MMIO page is treated as identity-mapped.
        let apic_virt = VirtAddr::new_truncate(apic_phys);
        hw::local_apic::init(apic_virt, SPURIOUS_VECTOR);
        hw::local_apic::start_periodic_timer(idt::CLOCK_VECTOR, TIMER_INITIAL_COUNT, TIMER_DIVIDE);
    }
}
