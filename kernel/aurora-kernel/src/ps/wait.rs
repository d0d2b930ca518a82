//! Per-CPU wait tracking and termination (spec §4.7, §4.8).
//!
//! A waiting thread optionally sits on "the per-CPU wait tree keyed by
//! wake deadline" in addition to its dispatcher header's wait list. This
//! implementation keeps that tree as a flat, bounded array scanned for the
//! earliest deadline rather than a balanced tree — the core only needs
//! "find/remove the earliest deadline," and at the thread counts one CPU
//! ever hosts a linear scan over [`MAX_WAITERS_PER_CPU`] entries is cheaper
//! than maintaining tree invariants under the CPU lock. See `DESIGN.md`.
//!
//! Termination reuses the same [`List`] machinery as the ready queue:
//! "Termination is two-phase: the thread moves to the CPU's termination
//! queue and is fully freed only by a low-priority reaper routine running
//! when idle — this ensures the switch-out path never runs a destructor."

use core::ptr::NonNull;

use aurora_core::list::List;
use aurora_noalloc::vec::ArrayVec;

use crate::irql::Irql;
use crate::ps::thread::{Thread, NO_TIMEOUT};
use crate::sync::IrqlSpinLock;

/// Upper bound on threads with an outstanding timeout on one CPU at once.
pub const MAX_WAITERS_PER_CPU: usize = 256;

#[derive(Clone, Copy)]
struct TimeoutEntry {
    thread: NonNull<Thread>,
    deadline: u64,
}

// SAFETY: entries are only ever touched under `WaitTree`'s own lock.
unsafe impl Send for TimeoutEntry {}

struct WaitTreeInner {
    entries: ArrayVec<TimeoutEntry, MAX_WAITERS_PER_CPU>,
}

/// Errors [`WaitTree::insert`] can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTreeFull;

/// A CPU's wake-deadline index: every currently-waiting thread with a
/// bounded timeout is tracked here so the clock tick handler can find
/// whichever one expires next without scanning every dispatcher header.
pub struct WaitTree {
    inner: IrqlSpinLock<WaitTreeInner>,
}

impl WaitTree {
    /// Creates an empty wait tree.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: IrqlSpinLock::new(WaitTreeInner {
                entries: ArrayVec::new(),
            }),
        }
    }

    /// Tracks `thread`, due to wake at `deadline`. A thread with
    /// [`NO_TIMEOUT`] is never inserted — nothing to track.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTreeFull`] if [`MAX_WAITERS_PER_CPU`] waiters are
    /// already tracked.
    pub fn insert(&self, thread: NonNull<Thread>, deadline: u64) -> Result<(), WaitTreeFull> {
        if deadline == NO_TIMEOUT {
            return Ok(());
        }
        let mut guard = self.inner.acquire_and_raise(Irql::DISPATCH);
        guard
            .entries
            .try_push(TimeoutEntry { thread, deadline })
            .map_err(|_| WaitTreeFull)
    }

    /// Stops tracking `thread`, if present (woken some other way, e.g. by
    /// `set_signal`, before its timeout expired).
    pub fn remove(&self, thread: NonNull<Thread>) {
        let mut guard = self.inner.acquire_and_raise(Irql::DISPATCH);
        if let Some(idx) = guard.entries.as_slice().iter().position(|e| e.thread == thread) {
            guard.entries.swap_remove(idx);
        }
    }

    /// Removes and returns every thread whose deadline is `<= now`, in no
    /// particular order — the clock tick handler wakes all of them.
    pub fn take_expired(&self, now: u64) -> ArrayVec<NonNull<Thread>, MAX_WAITERS_PER_CPU> {
        let mut guard = self.inner.acquire_and_raise(Irql::DISPATCH);
        let mut expired = ArrayVec::new();
        let mut i = 0;
        while i < guard.entries.len() {
            if guard.entries.as_slice()[i].deadline <= now {
                let entry = guard.entries.swap_remove(i);
                let _ = expired.try_push(entry.thread);
            } else {
                i += 1;
            }
        }
        expired
    }

    /// The earliest deadline currently tracked, if any.
    #[must_use]
    pub fn earliest_deadline(&self) -> Option<u64> {
        let guard = self.inner.acquire_and_raise(Irql::DISPATCH);
        guard.entries.as_slice().iter().map(|e| e.deadline).min()
    }
}

impl Default for WaitTree {
    fn default() -> Self {
        Self::new()
    }
}

/// A CPU's termination queue: threads that have run their course but are
/// only actually freed by the reaper (spec §4.7: "never runs a destructor"
/// on the switch-out path itself).
pub struct TerminationQueue {
    list: IrqlSpinLock<List<Thread>>,
}

impl TerminationQueue {
    /// Creates an empty termination queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            list: IrqlSpinLock::new(List::new()),
        }
    }

    /// Moves `thread` onto the termination queue.
    ///
    /// # Safety
    ///
    /// `thread` must not already be linked into any queue.
    pub unsafe fn push(&self, thread: NonNull<Thread>) {
        let guard = self.list.acquire_and_raise(Irql::DISPATCH);
        // SAFETY: forwarded from this function's own contract.
        unsafe { guard.push_back(thread) };
    }

    /// Pops the next thread for the reaper to finish tearing down.
    pub fn pop(&self) -> Option<NonNull<Thread>> {
        let guard = self.list.acquire_and_raise(Irql::DISPATCH);
        guard.pop_front()
    }

    /// Returns `true` if nothing is awaiting reaping.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let guard = self.list.acquire_and_raise(Irql::DISPATCH);
        guard.is_empty()
    }
}

impl Default for TerminationQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_core::addr::VirtAddr;
    use aurora_core::id::{CpuId, ThreadId};
    use std::sync::Mutex as StdMutex;

    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    fn reset() -> std::sync::MutexGuard<'static, ()> {
        let guard = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let _ = crate::irql::lower(Irql::PASSIVE);
        guard
    }

    fn sample(id: u64) -> Thread {
        Thread::new(
            ThreadId::new(id),
            CpuId::new(0),
            VirtAddr::zero(),
            VirtAddr::new_truncate(0x1000),
            VirtAddr::new_truncate(0x2000),
            20,
        )
    }

    #[test]
    fn no_timeout_is_never_tracked() {
        let _serial = reset();
        let tree = WaitTree::new();
        let t = sample(1);
        tree.insert(NonNull::from(&t), NO_TIMEOUT).unwrap();
        assert_eq!(tree.earliest_deadline(), None);
    }

    #[test]
    fn take_expired_returns_only_due_entries() {
        let _serial = reset();
        let tree = WaitTree::new();
        let a = sample(1);
        let b = sample(2);
        tree.insert(NonNull::from(&a), 100).unwrap();
        tree.insert(NonNull::from(&b), 200).unwrap();
        assert_eq!(tree.earliest_deadline(), Some(100));
        let expired = tree.take_expired(150);
        assert_eq!(expired.len(), 1);
        assert_eq!(tree.earliest_deadline(), Some(200));
    }

    #[test]
    fn remove_stops_tracking_a_waiter() {
        let _serial = reset();
        let tree = WaitTree::new();
        let a = sample(1);
        tree.insert(NonNull::from(&a), 50).unwrap();
        tree.remove(NonNull::from(&a));
        assert_eq!(tree.earliest_deadline(), None);
    }

    #[test]
    fn termination_queue_is_fifo() {
        let _serial = reset();
        let q = TerminationQueue::new();
        let a = sample(1);
        let b = sample(2);
        unsafe {
            q.push(NonNull::from(&a));
            q.push(NonNull::from(&b));
        }
        assert_eq!(unsafe { q.pop().unwrap().as_ref() }.id(), ThreadId::new(1));
        assert!(!q.is_empty());
    }
}
