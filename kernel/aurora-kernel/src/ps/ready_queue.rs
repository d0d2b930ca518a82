//! Per-CPU ready queue (spec §4.7: "The per-CPU ready queue is strictly
//! FIFO").
//!
//! Backed by the same intrusive [`List`] every queue in this crate uses,
//! guarded by an [`IrqlSpinLock`] raised to [`Irql::DISPATCH`] — the level
//! the scheduler itself runs at.

use core::ptr::NonNull;

use aurora_core::list::List;

use crate::irql::Irql;
use crate::ps::thread::Thread;
use crate::sync::IrqlSpinLock;

/// A CPU's ready queue: threads waiting for their turn to run, in the
/// order they became ready.
pub struct ReadyQueue {
    list: IrqlSpinLock<List<Thread>>,
}

impl ReadyQueue {
    /// Creates an empty ready queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            list: IrqlSpinLock::new(List::new()),
        }
    }

    /// Appends `thread` to the tail — becoming ready always means
    /// rejoining at the back, never cutting the line.
    ///
    /// # Safety
    ///
    /// `thread` must not already be linked into any queue, and must
    /// outlive its membership here.
    pub unsafe fn push_back(&self, thread: NonNull<Thread>) {
        let guard = self.list.acquire_and_raise(Irql::DISPATCH);
        // SAFETY: forwarded from this function's own contract.
        unsafe { guard.push_back(thread) };
    }

    /// Pops the head of the queue, or `None` if empty.
    pub fn pop_front(&self) -> Option<NonNull<Thread>> {
        let guard = self.list.acquire_and_raise(Irql::DISPATCH);
        guard.pop_front()
    }

    /// Returns `true` if no thread is currently ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let guard = self.list.acquire_and_raise(Irql::DISPATCH);
        guard.is_empty()
    }

    /// Number of threads currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        let guard = self.list.acquire_and_raise(Irql::DISPATCH);
        guard.len()
    }
}

impl Default for ReadyQueue {
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
    fn fifo_order_is_preserved() {
        let _serial = reset();
        let q = ReadyQueue::new();
        let a = sample(1);
        let b = sample(2);
        let c = sample(3);
        unsafe {
            q.push_back(NonNull::from(&a));
            q.push_back(NonNull::from(&b));
            q.push_back(NonNull::from(&c));
        }
        assert_eq!(q.len(), 3);
        let first = q.pop_front().unwrap();
        assert_eq!(unsafe { first.as_ref() }.id(), ThreadId::new(1));
        let second = q.pop_front().unwrap();
        assert_eq!(unsafe { second.as_ref() }.id(), ThreadId::new(2));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn empty_queue_pops_none() {
        let _serial = reset();
        let q = ReadyQueue::new();
        assert!(q.is_empty());
        assert!(q.pop_front().is_none());
    }
}
