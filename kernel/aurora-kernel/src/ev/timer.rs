//! Timer objects (spec §3 "Timer object", §4.8 "Timer expiry").
//!
//! Unlike a signal, nothing makes a timer's deadline pass on its own —
//! something has to notice. Each CPU keeps its armed timers on one
//! intrusive list; [`fire_expired_current_cpu`] walks it once per tick from
//! [`crate::ps::scheduler::on_clock_tick`], matching "when the tick handler
//! sees now ≥ deadline, it queues a DISPATCH-level event" (spec §4.8).

use core::cell::Cell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

use aurora_core::cpu_local::{CpuLocal, MAX_CPUS};
use aurora_core::list::List;
use aurora_core::{impl_linked, list::ListLink};

use crate::ev::dispatcher::{self, DispatcherHeader, WaitResult};
use crate::irql::Irql;
use crate::ke::dpc::Dpc;
use crate::ps::scheduler;
use crate::sync::IrqlSpinLock;

/// A timer: dispatcher header plus an absolute deadline (ticks of the
/// platform timer period) and an optional DPC enqueued on expiry (spec
/// §3). "a timer whose deadline has passed... stays signalled" (spec
/// §4.8) — like a signal, expiry is sticky until rearmed.
pub struct Timer {
    header: DispatcherHeader,
    link: ListLink,
    deadline: AtomicU64,
    dpc: Cell<Option<NonNull<Dpc>>>,
}

// SAFETY: `header` already synchronizes all waiter-visible state; `link` is
// only touched under the owning CPU's armed-timer list lock; `dpc` is set
// once by `arm` before the timer is linked, and only read by the single
// CPU draining its own armed-timer list.
unsafe impl Send for Timer {}
unsafe impl Sync for Timer {}

impl_linked!(Timer, link);

impl Timer {
    /// Creates a new, unarmed timer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            header: DispatcherHeader::new(false),
            link: ListLink::new(),
            deadline: AtomicU64::new(u64::MAX),
            dpc: Cell::new(None),
        }
    }

    /// Reads whether this timer's deadline has passed.
    #[must_use]
    pub fn is_signalled(&self) -> bool {
        self.header.is_signalled()
    }

    /// Waits for this timer to expire, or `timeout_ticks` to elapse first
    /// ([`crate::ps::thread::NO_TIMEOUT`] for an unlimited wait).
    ///
    /// # Panics
    ///
    /// Escalates to `fatal_error` if called above [`Irql::DISPATCH`] or
    /// with no thread currently running on this CPU.
    pub fn wait(&self, timeout_ticks: u64) -> WaitResult {
        dispatcher::require_suspendable();
        let current =
            scheduler::current_thread().expect("Timer::wait requires a running thread");
        let guard = self.header.lock();
        if guard.signalled {
            return WaitResult::Signalled;
        }
        // SAFETY: `current` is this CPU's own running thread.
        unsafe { dispatcher::block_current_thread(&self.header, guard, current, timeout_ticks) };
        if unsafe { current.as_ref() }.woken_by_timeout() {
            WaitResult::TimedOut
        } else {
            WaitResult::Signalled
        }
    }

    /// Arms this timer to fire at `deadline` (an absolute tick count as
    /// returned by [`crate::ps::scheduler::current_tick`]), optionally
    /// enqueuing `dpc` as a high-priority DPC on the firing CPU when it
    /// expires, and links it onto the calling CPU's armed-timer list.
    ///
    /// # Safety
    ///
    /// `dpc`, if given, must outlive this timer's arming — it is queued by
    /// pointer, not copied. `self` must not already be armed.
    pub unsafe fn arm(&self, deadline: u64, dpc: Option<NonNull<Dpc>>) {
        self.deadline.store(deadline, Ordering::Release);
        self.dpc.set(dpc);
        self.header.lock().signalled = false;
        let list = ARMED_TIMERS.get();
        let guard = list.acquire_and_raise(Irql::DISPATCH);
        // SAFETY: forwarded from this function's own contract.
        unsafe { guard.push_back(NonNull::from(self)) };
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

static ARMED_TIMERS: CpuLocal<IrqlSpinLock<List<Timer>>> =
    CpuLocal::new([const { IrqlSpinLock::new(List::new()) }; MAX_CPUS]);

/// Walks the calling CPU's armed-timer list, firing (signalling, waking
/// waiters, enqueuing the attached DPC if any) every timer whose deadline
/// is `<= now`. Called once per tick from
/// [`crate::ps::scheduler::on_clock_tick`].
pub fn fire_expired_current_cpu(now: u64) {
    loop {
        let expired = {
            let list = ARMED_TIMERS.get();
            let guard = list.acquire_and_raise(Irql::DISPATCH);
            // SAFETY: the list is only ever walked here, under its own
            // lock, on the CPU that owns it.
            let found = unsafe { guard.iter() }
                .find(|t| unsafe { t.as_ref() }.deadline.load(Ordering::Acquire) <= now);
            match found {
                Some(t) => {
                    // SAFETY: `t` is linked into this very list.
                    unsafe { guard.remove(t) };
                    Some(t)
                }
                None => None,
            }
        };
        let Some(timer) = expired else { break };
        // SAFETY: `timer` was linked by `arm` and stays valid until fired.
        let timer_ref = unsafe { timer.as_ref() };
        let mut dguard = timer_ref.header.lock();
        dguard.signalled = true;
        dispatcher::wake_all(&mut dguard);
        drop(dguard);
        if let Some(dpc) = timer_ref.dpc.take() {
            // SAFETY: `arm`'s contract guarantees the DPC outlives arming.
            unsafe { crate::ke::dpc::queue(dpc, true) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn armed_timer_fires_once_deadline_passes() {
        let _serial = reset();
        let idle = sample(1);
        let waiter = sample(2);
        scheduler::init_cpu(NonNull::from(&idle));
        unsafe { scheduler::enqueue_ready(NonNull::from(&waiter)) };
        scheduler::yield_now();

        let timer = Timer::new();
        // SAFETY: no DPC attached; timer outlives this test.
        unsafe { timer.arm(100, None) };
        assert!(!timer.is_signalled());

        let _ = timer.wait(crate::ps::thread::NO_TIMEOUT);
        assert_eq!(waiter.state(), ThreadState::Waiting);

        fire_expired_current_cpu(50);
        assert!(!timer.is_signalled());
        assert_eq!(waiter.state(), ThreadState::Waiting);

        fire_expired_current_cpu(100);
        assert!(timer.is_signalled());
        assert_eq!(waiter.state(), ThreadState::Ready);
    }

    #[test]
    fn wait_on_already_expired_timer_returns_without_blocking() {
        let _serial = reset();
        let idle = sample(1);
        let waiter = sample(2);
        scheduler::init_cpu(NonNull::from(&idle));
        unsafe { scheduler::enqueue_ready(NonNull::from(&waiter)) };
        scheduler::yield_now();

        let timer = Timer::new();
        unsafe { timer.arm(0, None) };
        fire_expired_current_cpu(0);
        assert!(timer.is_signalled());

        assert_eq!(
            timer.wait(crate::ps::thread::NO_TIMEOUT),
            WaitResult::Signalled
        );
        assert_eq!(waiter.state(), ThreadState::Running);
    }
}
