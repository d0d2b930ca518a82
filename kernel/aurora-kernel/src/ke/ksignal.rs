//! Kernel signals: a lightweight cousin of DPCs used internally by the
//! scheduler, with the same queue model and the same drainer running at
//! `Irql::DISPATCH`, but a queue kept entirely separate from [`super::dpc`]
//! so a flood of driver-queued DPCs can never starve scheduler-internal
//! work (cross-CPU wake requests, timer-expiry wakeups) behind it.

use core::ptr::NonNull;

use aurora_core::cpu_local::{CpuLocal, MAX_CPUS};
use aurora_core::list::List;
use aurora_core::{impl_linked, list::ListLink};

use crate::irql::Irql;
use crate::sync::IrqlSpinLock;

/// A kernel-signal routine; same tagged-function-pointer shape as
/// [`super::dpc::DpcRoutine`].
pub type KSignalRoutine = fn(*mut ());

/// A kernel-signal record: linkage node, function pointer, opaque context.
pub struct KSignal {
    link: ListLink,
    routine: KSignalRoutine,
    context: *mut (),
}

// SAFETY: `context` is an opaque pointer the caller synchronizes; the
// record itself is only touched under the owning CPU's queue lock once
// queued.
unsafe impl Send for KSignal {}
unsafe impl Sync for KSignal {}

impl_linked!(KSignal, link);

impl KSignal {
    /// Builds a new, unqueued kernel signal calling `routine(context)` when
    /// drained.
    #[must_use]
    pub const fn new(routine: KSignalRoutine, context: *mut ()) -> Self {
        Self {
            link: ListLink::new(),
            routine,
            context,
        }
    }

    /// Returns `true` if this record is currently linked into some CPU's
    /// queue.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.link.is_linked()
    }
}

struct KSignalQueueInner {
    high: List<KSignal>,
    low: List<KSignal>,
}

struct KSignalQueue {
    inner: IrqlSpinLock<KSignalQueueInner>,
}

impl KSignalQueue {
    const fn new() -> Self {
        Self {
            inner: IrqlSpinLock::new(KSignalQueueInner {
                high: List::new(),
                low: List::new(),
            }),
        }
    }
}

// SAFETY: all access to both inner lists goes through `inner`'s own lock.
unsafe impl Send for KSignalQueue {}
unsafe impl Sync for KSignalQueue {}

static QUEUES: CpuLocal<KSignalQueue> = CpuLocal::new([const { KSignalQueue::new() }; MAX_CPUS]);

/// Places `signal` on the calling CPU's kernel-signal queue: prepended if
/// `high_priority`, otherwise appended. Used by [`crate::ps::scheduler`] to
/// schedule its own wake/reschedule work without routing it through the
/// user-visible DPC queue.
///
/// # Safety
///
/// `signal` must not already be linked into any queue, and must remain
/// valid until popped and invoked by [`drain_current_cpu`].
pub unsafe fn queue(signal: NonNull<KSignal>, high_priority: bool) {
    let queue = QUEUES.get();
    let mut guard = queue.inner.acquire_and_raise(Irql::MAX);
    if high_priority {
        // SAFETY: forwarded from this function's own contract.
        unsafe { guard.high.push_front(signal) };
    } else {
        // SAFETY: forwarded from this function's own contract.
        unsafe { guard.low.push_back(signal) };
    }
}

fn pop_current_cpu() -> Option<NonNull<KSignal>> {
    let queue = QUEUES.get();
    let guard = queue.inner.acquire_and_raise(Irql::MAX);
    guard.high.pop_front().or_else(|| guard.low.pop_front())
}

/// Drains the calling CPU's kernel-signal queue at `Irql::DISPATCH`, the
/// same way [`super::dpc::drain_current_cpu`] drains the DPC queue. Called
/// from [`crate::arch::x86_64::idt::dispatch_interrupt`] on CLOCK and IPI
/// vector completion, before the DPC queue drain so scheduler-internal
/// wakeups are never delayed behind driver DPC traffic.
pub fn drain_current_cpu() {
    while let Some(signal) = pop_current_cpu() {
        // SAFETY: `signal` was linked by `queue`, which guarantees it stays
        // valid until popped.
        let (routine, context) =
            unsafe { ((*signal.as_ptr()).routine, (*signal.as_ptr()).context) };
        routine(context);
    }
}

/// Returns `true` if the calling CPU has no kernel signals awaiting drain.
#[must_use]
pub fn is_empty_current_cpu() -> bool {
    let queue = QUEUES.get();
    let guard = queue.inner.acquire_and_raise(Irql::MAX);
    guard.high.is_empty() && guard.low.is_empty()
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

    static ORDER: IrqlSpinLock<[u8; 4]> = IrqlSpinLock::new([0; 4]);
    static ORDER_LEN: AtomicU32 = AtomicU32::new(0);

    fn record(tag: u8) {
        let mut order = ORDER.acquire_and_raise(Irql::DISPATCH);
        let idx = ORDER_LEN.fetch_add(1, Ordering::Relaxed) as usize;
        order[idx] = tag;
    }

    fn reset_order() {
        ORDER_LEN.store(0, Ordering::Relaxed);
    }

    fn mark_a(_ctx: *mut ()) {
        record(1);
    }
    fn mark_b(_ctx: *mut ()) {
        record(2);
    }

    #[test]
    fn drains_separately_from_dpc_queue() {
        let _serial = reset();
        reset_order();
        let a = KSignal::new(mark_a, core::ptr::null_mut());
        let b = KSignal::new(mark_b, core::ptr::null_mut());
        unsafe {
            queue(NonNull::from(&a), false);
            queue(NonNull::from(&b), true);
        }
        assert!(!is_empty_current_cpu());
        drain_current_cpu();
        assert!(is_empty_current_cpu());
        assert_eq!(*ORDER.acquire_and_raise(Irql::DISPATCH), [2, 1, 0, 0]);
    }
}
