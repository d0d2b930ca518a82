//! Mutex objects (spec §3 "Mutex object", §4.8 "Mutex release").
//!
//! Recursive acquisition by the owner increments a recursion count rather
//! than blocking; release only has an externally visible effect (handing
//! ownership to the head of the wait list) once recursion reaches zero.
//! Kept as its own concrete wait-list/lock pair rather than layered on
//! [`super::dispatcher::DispatcherHeader`] — the owner/recursion/contention
//! fields need to be mutated atomically with the same lock that guards the
//! wait list, and `DispatcherHeader`'s inner type has no room for them.

use core::ptr::NonNull;
use core::sync::atomic::Ordering;

use aurora_core::list::List;

use crate::ev::dispatcher::{require_suspendable, WaitResult};
use crate::irql::Irql;
use crate::ps::scheduler;
use crate::ps::thread::{Thread, ThreadState, NO_TIMEOUT};
use crate::sync::IrqlSpinLock;

struct MutexInner {
    wait_list: List<Thread>,
    owner: Option<NonNull<Thread>>,
    recursion: u32,
    contention: u32,
}

/// [`Thread::set_current_wait`] callback for a mutex's own wait list (spec
/// §9's back-reference, kept per-kind here the same way `Mutex` keeps its
/// own wait-list/lock pair instead of `DispatcherHeader`). Reacquires
/// `target`'s own lock and removes `thread` if it is still linked there —
/// a no-op if `release` already handed it ownership and unlinked it first.
fn unlink_waiter(target: NonNull<()>, thread: NonNull<Thread>) {
    // SAFETY: only ever stored by `Mutex::acquire` alongside a `target`
    // that points at the live `Mutex` it blocked on.
    let mutex = unsafe { target.cast::<Mutex>().as_ref() };
    let mut guard = mutex.inner.acquire_and_raise(Irql::DISPATCH);
    // SAFETY: `thread` is a live thread; the "at most one dispatcher wait
    // list at a time" invariant (spec §3) means `is_queued` here can only
    // mean "still linked into this mutex's wait list".
    if unsafe { thread.as_ref() }.is_queued() {
        // SAFETY: still linked into this exact wait list per the above.
        unsafe { guard.wait_list.remove(thread) };
    }
}

/// A recursive mutex (spec §3): dispatcher header plus recursion count,
/// contention count, and owner pointer. Only the owner may release it.
pub struct Mutex {
    inner: IrqlSpinLock<MutexInner>,
}

// SAFETY: all mutable state lives behind `inner`'s own lock.
unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

impl Mutex {
    /// Creates a new, unowned mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: IrqlSpinLock::new(MutexInner {
                wait_list: List::new(),
                owner: None,
                recursion: 0,
                contention: 0,
            }),
        }
    }

    /// Acquires the mutex: recursively if the caller already owns it,
    /// immediately if it is free, or blocks up to `timeout_ticks` otherwise
    /// ([`NO_TIMEOUT`] for an unlimited wait).
    ///
    /// # Panics
    ///
    /// Escalates to `fatal_error` if called above [`Irql::DISPATCH`] or
    /// with no thread currently running on this CPU.
    pub fn acquire(&self, timeout_ticks: u64) -> WaitResult {
        require_suspendable();
        let current = scheduler::current_thread().expect("Mutex::acquire requires a running thread");
        let mut guard = self.inner.acquire_and_raise(Irql::DISPATCH);

        if guard.owner == Some(current) {
            guard.recursion += 1;
            return WaitResult::Signalled;
        }
        if guard.owner.is_none() {
            guard.owner = Some(current);
            guard.recursion = 1;
            return WaitResult::Signalled;
        }

        guard.contention += 1;
        // SAFETY: `current` is not linked into any other queue — it was
        // `Running`.
        unsafe { guard.wait_list.push_back(current) };
        // SAFETY: `current` is the calling thread; this runs while `self`'s
        // own lock (`guard`) is still held, matching `set_current_wait`'s
        // contract.
        unsafe { current.as_ref() }.set_current_wait(NonNull::from(self).cast::<()>(), unlink_waiter);
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

        if current_ref.woken_by_timeout() {
            WaitResult::TimedOut
        } else {
            WaitResult::Signalled
        }
    }

    /// Releases one level of recursion (spec §4.8 "mutex release"). A
    /// release by a thread that is not the current owner is a no-op — the
    /// fixed panic code enumeration (spec §6) reserves no dedicated code
    /// for this case, so it is treated as a caller bug with no observable
    /// effect rather than escalated.
    pub fn release(&self) {
        let current = scheduler::current_thread().expect("Mutex::release requires a running thread");
        let mut guard = self.inner.acquire_and_raise(Irql::DISPATCH);
        if guard.owner != Some(current) {
            return;
        }
        guard.recursion -= 1;
        if guard.recursion != 0 {
            return;
        }
        guard.owner = None;
        if let Some(next) = guard.wait_list.pop_front() {
            guard.owner = Some(next);
            guard.recursion = 1;
            // SAFETY: `next` was just unlinked from this mutex's own wait
            // list and is linked nowhere else.
            unsafe { scheduler::wake_waiter(next) };
        }
    }

    /// The current owner, if any.
    #[must_use]
    pub fn owner(&self) -> Option<NonNull<Thread>> {
        self.inner.acquire_and_raise(Irql::DISPATCH).owner
    }

    /// Current recursion depth (0 if unowned).
    #[must_use]
    pub fn recursion_count(&self) -> u32 {
        self.inner.acquire_and_raise(Irql::DISPATCH).recursion
    }

    /// Total number of times `acquire` has had to block on this mutex.
    #[must_use]
    pub fn contention_count(&self) -> u32 {
        self.inner.acquire_and_raise(Irql::DISPATCH).contention
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irql::Irql;
    use crate::ps::scheduler;
    use crate::ps::thread::{Thread, ThreadState};
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

    fn become_current(idle: &Thread, thread: &Thread) {
        scheduler::init_cpu(NonNull::from(idle));
        unsafe { scheduler::enqueue_ready(NonNull::from(thread)) };
        scheduler::yield_now();
    }

    #[test]
    fn first_acquire_succeeds_with_no_contention() {
        let _serial = reset();
        let idle = sample(1);
        let t1 = sample(2);
        become_current(&idle, &t1);

        let m = Mutex::new();
        assert_eq!(m.acquire(crate::ps::thread::NO_TIMEOUT), WaitResult::Signalled);
        assert_eq!(m.owner(), scheduler::current_thread());
        assert_eq!(m.recursion_count(), 1);
        assert_eq!(m.contention_count(), 0);
    }

    #[test]
    fn recursive_acquire_increments_without_blocking() {
        let _serial = reset();
        let idle = sample(1);
        let t1 = sample(2);
        become_current(&idle, &t1);

        let m = Mutex::new();
        for expected in 1..=3 {
            assert_eq!(m.acquire(crate::ps::thread::NO_TIMEOUT), WaitResult::Signalled);
            assert_eq!(m.recursion_count(), expected);
        }
        assert_eq!(t1.state(), ThreadState::Running);
    }

    #[test]
    fn release_below_zero_recursion_transfers_to_waiter() {
        let _serial = reset();
        let idle = sample(1);
        let t1 = sample(2);
        become_current(&idle, &t1);

        let m = Mutex::new();
        m.acquire(crate::ps::thread::NO_TIMEOUT);
        m.acquire(crate::ps::thread::NO_TIMEOUT);
        m.acquire(crate::ps::thread::NO_TIMEOUT);
        assert_eq!(m.recursion_count(), 3);

        // Simulate t2 contending: link it directly onto the mutex's own
        // wait list the way a blocked `acquire` would, without actually
        // switching away (the host target has no real stacks to switch
        // between — see `perform_switch`).
        let t2 = sample(3);
        {
            let mut guard = m.inner.acquire_and_raise(Irql::DISPATCH);
            guard.contention += 1;
            t2.set_state(ThreadState::Waiting);
            // SAFETY: `t2` is not linked into any other queue.
            unsafe { guard.wait_list.push_back(NonNull::from(&t2)) };
        }

        m.release();
        assert_eq!(m.recursion_count(), 2);
        assert_eq!(m.owner(), scheduler::current_thread());

        m.release();
        m.release();
        assert_eq!(m.owner(), Some(NonNull::from(&t2)));
        assert_eq!(m.recursion_count(), 1);
        assert_eq!(t2.state(), ThreadState::Ready);
    }

    #[test]
    fn release_by_non_owner_is_a_no_op() {
        let _serial = reset();
        let idle = sample(1);
        let t1 = sample(2);
        become_current(&idle, &t1);

        let m = Mutex::new();
        m.release();
        assert_eq!(m.owner(), None);
        assert_eq!(m.recursion_count(), 0);
    }
}
