//! Inter-processor signalling (spec §4.6).
//!
//! Three primitives, all built on one pending-broadcast slot plus a
//! two-phase arrival/release barrier: [`notify`] wakes a single peer,
//! [`broadcast_ipi`] wakes every other online CPU with no synchronisation
//! beyond delivery, and [`request_routine`] serialises a global routine
//! across every CPU exactly once. [`join_requested_routine`] is the IPI
//! vector's handler, called from `arch::x86_64::idt::dispatch_interrupt` on
//! every CPU but the one that issued the broadcast.

use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

use aurora_core::cpu_local::current_cpu_id;
use aurora_core::id::CpuId;

use crate::irql::Irql;
use crate::sync::IrqlSpinLock;

/// A routine `request_routine`/the panic freeze path can run on every CPU.
/// The opaque context pointer is the same tagged-function-pointer pattern
/// used for DPCs and interrupt objects (spec §9: "dynamic dispatch").
pub type BroadcastRoutine = fn(*mut ());

struct PendingBroadcast {
    routine: AtomicPtr<()>,
    context: AtomicPtr<()>,
    total_cpus: AtomicU32,
    arrived: AtomicU32,
    released: AtomicU32,
}

static PENDING: PendingBroadcast = PendingBroadcast {
    routine: AtomicPtr::new(core::ptr::null_mut()),
    context: AtomicPtr::new(core::ptr::null_mut()),
    total_cpus: AtomicU32::new(0),
    arrived: AtomicU32::new(0),
    released: AtomicU32::new(0),
};

/// Set once [`crate::ke::panic::fatal_error`] starts unwinding. A CPU that
/// observes this in its IPI handler has only one job left: halt forever.
static FROZEN: AtomicBool = AtomicBool::new(false);

/// Serialises concurrent calls to [`request_routine`] — only one broadcast
/// routine may be in flight at a time (spec §4.6: "acquires a global lock").
static ROUTINE_LOCK: IrqlSpinLock<()> = IrqlSpinLock::new(());

/// Number of CPUs currently online and participating in broadcasts. Starts
/// at 1 (the boot processor); [`crate::boot`] raises it as each AP comes up.
static ONLINE_CPUS: AtomicU32 = AtomicU32::new(1);

/// Records how many CPUs are online, for [`broadcast_ipi`] and
/// [`request_routine`] to address. Called once per successful AP bring-up.
pub fn set_online_cpu_count(count: u32) {
    ONLINE_CPUS.store(count.max(1), Ordering::Release);
}

/// Returns the current online CPU count.
#[must_use]
pub fn online_cpu_count() -> u32 {
    ONLINE_CPUS.load(Ordering::Acquire)
}

/// Asks `cpu` to interrupt itself at or above `target_irql` (spec §4.6).
/// `target_irql` is accepted for interface parity with the spec but every
/// IPI on this platform is delivered at a single fixed vector/priority; a
/// future target with per-priority IPI classes would consult it here.
pub fn notify(cpu: CpuId, target_irql: Irql) {
    let _ = target_irql;
    send_ipi_to(cpu);
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
fn send_ipi_to(cpu: CpuId) {
    crate::arch::x86_64::hw::local_apic::send_ipi(
        cpu.as_u32() as u8,
        crate::arch::x86_64::idt::IPI_VECTOR,
    );
}

#[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
fn send_ipi_to(_cpu: CpuId) {}

/// Raises every other online CPU into the IPI handler.
pub fn broadcast_ipi() {
    let me = CpuId::new(current_cpu_id());
    for id in 0..online_cpu_count() {
        let cpu = CpuId::new(id);
        if cpu != me {
            notify(cpu, Irql::MAX);
        }
    }
}

/// Serialises `routine(arg)` across every online CPU exactly once:
/// acquires [`ROUTINE_LOCK`], raises to IPI level, broadcasts, runs
/// `routine` locally, synchronises via a two-phase arrival/release barrier,
/// then releases (spec §4.6).
pub fn request_routine(routine: BroadcastRoutine, arg: *mut ()) {
    let _guard = ROUTINE_LOCK.acquire_and_raise(Irql::MAX);
    let total = online_cpu_count();

    PENDING.routine.store(routine as *mut (), Ordering::Release);
    PENDING.context.store(arg, Ordering::Release);
    PENDING.total_cpus.store(total, Ordering::Release);
    PENDING.arrived.store(0, Ordering::Release);
    PENDING.released.store(0, Ordering::Release);

    broadcast_ipi();

    routine(arg);
    join_barrier(total);
}

/// The IPI vector's handler on every CPU but the sender: runs the pending
/// routine, if any, then joins the arrival/release barrier so
/// `request_routine` knows every CPU has completed.
pub fn join_requested_routine(cpu: CpuId) {
    let _ = cpu;
    let routine = PENDING.routine.load(Ordering::Acquire);
    if routine.is_null() {
        return;
    }
    if FROZEN.load(Ordering::Acquire) {
        // The panic path never waits for its freeze routine to report back;
        // run it and stop, without touching the barrier counters.
        let arg = PENDING.context.load(Ordering::Acquire);
        // SAFETY: only ever stored by `freeze_other_cpus`, which stores a
        // real `BroadcastRoutine`.
        let f: BroadcastRoutine = unsafe { core::mem::transmute(routine) };
        f(arg);
        return;
    }
    let arg = PENDING.context.load(Ordering::Acquire);
    // SAFETY: only ever stored by `request_routine`, which stores a real
    // `BroadcastRoutine`.
    let f: BroadcastRoutine = unsafe { core::mem::transmute(routine) };
    f(arg);
    join_barrier(PENDING.total_cpus.load(Ordering::Acquire));
}

fn join_barrier(total: u32) {
    PENDING.arrived.fetch_add(1, Ordering::AcqRel);
    while PENDING.arrived.load(Ordering::Acquire) < total {
        core::hint::spin_loop();
    }
    PENDING.released.fetch_add(1, Ordering::AcqRel);
    while PENDING.released.load(Ordering::Acquire) < total {
        core::hint::spin_loop();
    }
}

/// Broadcasts a freeze: every other CPU runs [`freeze_routine`] and never
/// returns (spec §4.9: "broadcasts a freeze IPI to all other CPUs, each
/// enters a halt loop"). The sender does not wait for acknowledgement —
/// a frozen CPU might never get the chance to signal back.
pub fn freeze_other_cpus() {
    FROZEN.store(true, Ordering::Release);
    PENDING.routine.store(freeze_routine as *mut (), Ordering::Release);
    PENDING.context.store(core::ptr::null_mut(), Ordering::Release);
    broadcast_ipi();
}

fn freeze_routine(_arg: *mut ()) {
    #[cfg(all(target_os = "none", target_arch = "x86_64"))]
    loop {
        crate::arch::x86_64::instructions::halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    #[test]
    fn online_cpu_count_round_trips() {
        let _serial = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        set_online_cpu_count(4);
        assert_eq!(online_cpu_count(), 4);
        set_online_cpu_count(1);
    }

    #[test]
    fn single_cpu_request_routine_runs_locally_and_returns() {
        let _serial = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let _ = crate::irql::lower(Irql::PASSIVE);
        set_online_cpu_count(1);
        static RAN: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);
        fn mark(_arg: *mut ()) {
            RAN.store(true, Ordering::Relaxed);
        }
        request_routine(mark, core::ptr::null_mut());
        assert!(RAN.load(Ordering::Relaxed));
    }

    #[test]
    fn notify_self_excluded_from_broadcast_with_one_cpu() {
        let _serial = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        set_online_cpu_count(1);
        // On a single-CPU system broadcast_ipi addresses nobody; this must
        // not panic or loop.
        broadcast_ipi();
    }
}
