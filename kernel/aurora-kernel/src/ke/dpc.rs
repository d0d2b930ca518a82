//! Deferred procedure calls: short work items a device handler defers to
//! DISPATCH IRQL instead of running inline at DEVICE level.
//!
//! A [`Dpc`] is not an OB-managed object — callers own its storage (usually
//! embedded in the interrupt object or dispatcher header that queues it) and
//! must keep it alive until the drain loop invokes it. The queue itself is
//! per-CPU, split into a high-priority list (prepended, drained LIFO) and a
//! low-priority list (appended, drained FIFO), both guarded by one lock
//! raised to `Irql::MAX` for the brief list mutation; draining happens back
//! down at `Irql::DISPATCH`.

use core::ptr::NonNull;

use aurora_core::cpu_local::{current_cpu_id, CpuLocal, MAX_CPUS};
use aurora_core::id::CpuId;
use aurora_core::list::List;
use aurora_core::{impl_linked, list::ListLink};

use crate::irql::Irql;
use crate::sync::IrqlSpinLock;

/// A DPC routine: the opaque context pointer is the same tagged-function
/// pointer pattern used for interrupt objects and IPI broadcast routines.
pub type DpcRoutine = fn(*mut ());

/// A deferred procedure call record: linkage node, function pointer, and
/// opaque context.
pub struct Dpc {
    link: ListLink,
    routine: DpcRoutine,
    context: *mut (),
}

// SAFETY: `context` is an opaque pointer the caller is responsible for
// synchronizing; the `Dpc` itself is only ever touched under the owning
// CPU's queue lock once queued.
unsafe impl Send for Dpc {}
unsafe impl Sync for Dpc {}

impl_linked!(Dpc, link);

impl Dpc {
    /// Builds a new, unqueued DPC calling `routine(context)` when drained.
    #[must_use]
    pub const fn new(routine: DpcRoutine, context: *mut ()) -> Self {
        Self {
            link: ListLink::new(),
            routine,
            context,
        }
    }

    /// Returns `true` if this DPC is currently linked into some CPU's queue.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.link.is_linked()
    }
}

struct DpcQueueInner {
    high: List<Dpc>,
    low: List<Dpc>,
}

struct DpcQueue {
    inner: IrqlSpinLock<DpcQueueInner>,
}

impl DpcQueue {
    const fn new() -> Self {
        Self {
            inner: IrqlSpinLock::new(DpcQueueInner {
                high: List::new(),
                low: List::new(),
            }),
        }
    }
}

// SAFETY: all access to both inner lists goes through `inner`'s own lock.
unsafe impl Send for DpcQueue {}
unsafe impl Sync for DpcQueue {}

static QUEUES: CpuLocal<DpcQueue> = CpuLocal::new([const { DpcQueue::new() }; MAX_CPUS]);

/// Places `dpc` on the calling CPU's DPC queue: prepended (to be drained
/// first, LIFO among high-priority entries) if `high_priority`, otherwise
/// appended (drained last, FIFO among low-priority entries).
///
/// High-priority queuing asks for the drain to happen as soon as possible;
/// since this is always called from code already running at DEVICE IRQL or
/// above on the CPU it targets, no separate self-notification is needed —
/// the interrupt return path already runs the CLOCK/IPI vector's drain step
/// before IRQL ever drops back to the queuing thread's own level.
///
/// # Safety
///
/// `dpc` must not already be linked into any queue, and must remain valid
/// until it is popped and invoked by [`drain_current_cpu`].
pub unsafe fn queue(dpc: NonNull<Dpc>, high_priority: bool) {
    let queue = QUEUES.get();
    let mut guard = queue.inner.acquire_and_raise(Irql::MAX);
    if high_priority {
        // SAFETY: forwarded from this function's own contract.
        unsafe { guard.high.push_front(dpc) };
    } else {
        // SAFETY: forwarded from this function's own contract.
        unsafe { guard.low.push_back(dpc) };
    }
}

fn pop_current_cpu() -> Option<NonNull<Dpc>> {
    let queue = QUEUES.get();
    let guard = queue.inner.acquire_and_raise(Irql::MAX);
    guard.high.pop_front().or_else(|| guard.low.pop_front())
}

/// Drains the calling CPU's DPC queue: pops one entry at a time, invoking
/// each routine between pops, until both lists are empty. Called from
/// [`crate::arch::x86_64::idt::dispatch_interrupt`] on CLOCK and IPI vector
/// completion, at `Irql::DISPATCH`.
pub fn drain_current_cpu() {
    while let Some(dpc) = pop_current_cpu() {
        // SAFETY: `dpc` was linked by `queue`, which guarantees it stays
        // valid until popped; nothing else can observe it once unlinked.
        let (routine, context) = unsafe { ((*dpc.as_ptr()).routine, (*dpc.as_ptr()).context) };
        routine(context);
    }
}

/// Returns `true` if the calling CPU has no DPCs awaiting drain.
#[must_use]
pub fn is_empty_current_cpu() -> bool {
    let queue = QUEUES.get();
    let guard = queue.inner.acquire_and_raise(Irql::MAX);
    guard.high.is_empty() && guard.low.is_empty()
}

/// The CPU the calling code is currently running on, for callers building a
/// [`Dpc`] meant to queue itself from within its own routine.
#[must_use]
pub fn current_cpu() -> CpuId {
    CpuId::new(current_cpu_id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    fn reset() -> std::sync::MutexGuard<'static, ()> {
        let guard = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let _ = crate::irql::lower(Irql::PASSIVE);
        guard
    }

    static ORDER: IrqlSpinLock<[u8; 8]> = IrqlSpinLock::new([0; 8]);
    static ORDER_LEN: AtomicU32 = AtomicU32::new(0);

    fn record(tag: u8) {
        let mut order = ORDER.acquire_and_raise(Irql::DISPATCH);
        let idx = ORDER_LEN.fetch_add(1, Ordering::Relaxed) as usize;
        order[idx] = tag;
    }

    fn reset_order() {
        ORDER_LEN.store(0, Ordering::Relaxed);
    }

    fn recorded() -> [u8; 8] {
        *ORDER.acquire_and_raise(Irql::DISPATCH)
    }

    fn mark_1(_ctx: *mut ()) {
        record(1);
    }
    fn mark_2(_ctx: *mut ()) {
        record(2);
    }
    fn mark_3(_ctx: *mut ()) {
        record(3);
    }
    fn mark_4(_ctx: *mut ()) {
        record(4);
    }

    #[test]
    fn high_priority_drains_lifo_then_low_priority_fifo() {
        let _serial = reset();
        reset_order();
        let a = Dpc::new(mark_1, core::ptr::null_mut());
        let b = Dpc::new(mark_2, core::ptr::null_mut());
        let c = Dpc::new(mark_3, core::ptr::null_mut());
        let d = Dpc::new(mark_4, core::ptr::null_mut());
        unsafe {
            queue(NonNull::from(&a), false);
            queue(NonNull::from(&b), true);
            queue(NonNull::from(&c), false);
            queue(NonNull::from(&d), true);
        }
        drain_current_cpu();
        assert_eq!(&recorded()[..4], &[4, 2, 1, 3]);
        assert!(is_empty_current_cpu());
    }

    #[test]
    fn empty_queue_drains_without_calling_anything() {
        let _serial = reset();
        assert!(is_empty_current_cpu());
        drain_current_cpu();
    }

    #[test]
    fn unqueued_dpc_reports_not_queued() {
        let _serial = reset();
        let dpc = Dpc::new(mark_1, core::ptr::null_mut());
        assert!(!dpc.is_queued());
        unsafe { queue(NonNull::from(&dpc), true) };
        assert!(dpc.is_queued());
        drain_current_cpu();
    }
}
