//! Dispatcher header: the wait-list/signalled-flag machinery embedded as
//! the first field of every waitable primitive (spec §3 "Dispatcher
//! header", §4.8).
//!
//! A thread sits on at most one dispatcher's wait list at a time, reusing
//! the same [`ListLink`](aurora_core::list::ListLink) its ready-queue and
//! termination-queue membership already share (spec §3: "linkage node used
//! by exactly one queue at a time").

use core::ptr::NonNull;
use core::sync::atomic::Ordering;

use aurora_core::list::List;

use crate::irql::Irql;
use crate::ke::panic::fatal_error;
use crate::ps::scheduler;
use crate::ps::thread::{Thread, ThreadState, NO_TIMEOUT};
use crate::sync::{IrqlSpinLock, IrqlSpinLockGuard};

/// Outcome of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The object was, or became, available before the timeout elapsed.
    Signalled,
    /// The timeout elapsed first.
    TimedOut,
}

pub(super) struct DispatcherInner {
    pub(super) wait_list: List<Thread>,
    pub(super) signalled: bool,
}

/// Shared header every waitable object (signal, mutex, timer) embeds as its
/// first field. Holds the wait list and signalled flag under one lock,
/// acquired at [`Irql::DISPATCH`] — the scheduler's own level, so no
/// dispatcher operation can be preempted by a reschedule mid-update.
pub struct DispatcherHeader {
    pub(super) inner: IrqlSpinLock<DispatcherInner>,
}

// SAFETY: all mutable state lives behind `inner`'s own lock.
unsafe impl Send for DispatcherHeader {}
unsafe impl Sync for DispatcherHeader {}

impl DispatcherHeader {
    /// Creates a new header, initially signalled or not.
    #[must_use]
    pub const fn new(initially_signalled: bool) -> Self {
        Self {
            inner: IrqlSpinLock::new(DispatcherInner {
                wait_list: List::new(),
                signalled: initially_signalled,
            }),
        }
    }

    /// Reads the signalled flag. Spec §3 permits reading this without the
    /// lock; this implementation takes it anyway — nothing in this crate
    /// needs the lock-free fast path, and taking the lock keeps the read
    /// honest about the wait list it was observed alongside (see
    /// `DESIGN.md`).
    #[must_use]
    pub fn is_signalled(&self) -> bool {
        self.inner.acquire_and_raise(Irql::DISPATCH).signalled
    }

    pub(super) fn lock(&self) -> IrqlSpinLockGuard<'_, DispatcherInner> {
        self.inner.acquire_and_raise(Irql::DISPATCH)
    }
}

impl Default for DispatcherHeader {
    fn default() -> Self {
        Self::new(false)
    }
}

/// [`Thread::set_current_wait`] callback for dispatcher-header waiters
/// (signals, timers): reacquires `target`'s own lock and removes `thread`
/// from its wait list if it is still linked there. A no-op if a concurrent
/// `set_signal`/timer expiry already unlinked it first — the "at most one
/// dispatcher wait list at a time" invariant (spec §3) means `is_queued`
/// can only be reporting membership in *this* list while `current_wait`
/// still names this header.
fn unlink_waiter(target: NonNull<()>, thread: NonNull<Thread>) {
    // SAFETY: only ever stored by `block_current_thread` alongside a
    // `target` that points at the live `DispatcherHeader` it was called
    // with.
    let header = unsafe { target.cast::<DispatcherHeader>().as_ref() };
    let mut guard = header.lock();
    // SAFETY: `thread` is a live thread; see this function's doc comment
    // for why `is_queued` here means "linked into this exact list".
    if unsafe { thread.as_ref() }.is_queued() {
        // SAFETY: still linked into this exact wait list per the above.
        unsafe { guard.wait_list.remove(thread) };
    }
}

/// The common tail of every `wait_for_object` variant once the caller has
/// determined the object is not immediately available under `guard`'s lock:
/// link `current` onto the wait list, release the lock, then hand off to
/// the scheduler (spec §4.8: "insert the current thread at the tail of the
/// wait list, set the thread's wake deadline..., queue the thread on its
/// CPU's wait tree, transition to waiting, lower IRQL, yield the CPU").
///
/// # Safety
///
/// `current` must be the calling CPU's own running thread, not linked into
/// any other queue.
pub(super) unsafe fn block_current_thread(
    header: &DispatcherHeader,
    mut guard: IrqlSpinLockGuard<'_, DispatcherInner>,
    current: NonNull<Thread>,
    timeout_ticks: u64,
) {
    // SAFETY: forwarded from this function's own contract.
    unsafe { guard.wait_list.push_back(current) };
    // SAFETY: `current` is the calling thread; this runs while `header`'s
    // own lock (`guard`) is still held, matching `set_current_wait`'s
    // contract.
    unsafe { current.as_ref() }.set_current_wait(NonNull::from(header).cast::<()>(), unlink_waiter);
    drop(guard);

    let deadline = if timeout_ticks == NO_TIMEOUT {
        NO_TIMEOUT
    } else {
        scheduler::current_tick().saturating_add(timeout_ticks)
    };
    // SAFETY: `current` is the calling thread.
    let current_ref = unsafe { current.as_ref() };
    current_ref.wake_deadline.store(deadline, Ordering::Release);
    current_ref.set_state(ThreadState::Waiting);
    scheduler::track_wait(current, deadline);
    scheduler::yield_now();
}

/// Guards against suspending above DISPATCH (spec §5: "a thread running
/// above DISPATCH IRQL must not suspend — attempting to wait at that IRQL
/// is fatal"). Called by every `wait_*` entry point before touching the
/// dispatcher lock.
pub(super) fn require_suspendable() {
    if let Err(err) = crate::irql::require_at_most(Irql::DISPATCH) {
        fatal_error(err.panic_code(), 0, 0, 0, 0);
    }
}

/// Removes every thread on `guard`'s wait list, waking each one on its own
/// home CPU (spec §4.8 `set_signal`: "walk the wait list, for each waiter
/// remove it from the list and from its CPU's wait tree, transition to
/// ready, enqueue on its home CPU's ready queue, and if that CPU is idle,
/// notify it").
pub(super) fn wake_all(guard: &mut IrqlSpinLockGuard<'_, DispatcherInner>) {
    while let Some(thread) = guard.wait_list.pop_front() {
        // SAFETY: `thread` was just unlinked from this dispatcher's wait
        // list and is linked nowhere else.
        unsafe { scheduler::wake_waiter(thread) };
    }
}

/// Removes and wakes exactly the head of `guard`'s wait list, if any.
/// Shared by mutex release (wakes the new owner) and timer expiry with an
/// attached DPC's effective single-waiter case.
pub(super) fn wake_one(guard: &mut IrqlSpinLockGuard<'_, DispatcherInner>) -> Option<NonNull<Thread>> {
    let thread = guard.wait_list.pop_front()?;
    // SAFETY: just unlinked from this dispatcher's wait list.
    unsafe { scheduler::wake_waiter(thread) };
    Some(thread)
}
