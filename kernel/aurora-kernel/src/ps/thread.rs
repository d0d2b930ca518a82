//! The kernel thread object (spec §3 "Thread", §4.7).
//!
//! A thread is OB-managed like any other kernel object — allocated with a
//! reference count of one, destroyed only when that count reaches zero —
//! but its body also carries the scheduler's own bookkeeping: which queue
//! it currently sits on (ready, waiting, or terminated — "exactly one
//! queue at a time"), its remaining quantum, its saved register context,
//! and the stack it runs on.

use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicU8, Ordering};

use aurora_core::addr::VirtAddr;
use aurora_core::id::{CpuId, Tag, ThreadId};
use aurora_core::list::ListLink;
use aurora_core::{impl_linked, list};

use crate::arch::x86_64::context::ContextFrame;
use crate::ob::TypeDescriptor;

/// A thread's position in the state machine spec §4.7 describes:
///
/// ```text
///            queue                    run
///   created ──────▶ ready ──────────▶ running
///                     ▲                 │ wait/delay
///                     │                 ▼
///                     └──── wake ── waiting
///                                    │ terminate
///                                    ▼
///                                terminated ──▶ reaped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// On a CPU's ready queue, waiting for the scheduler to pick it.
    Ready = 0,
    /// Currently executing on its home CPU.
    Running = 1,
    /// Blocked on a dispatcher object's wait list, optionally with a
    /// timeout tracked on the CPU's wait tree.
    Waiting = 2,
    /// Finished executing; sitting on the CPU's termination queue awaiting
    /// the reaper.
    Terminated = 3,
    /// The CPU's dedicated idle thread; never reaped.
    Idle = 4,
}

impl ThreadState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Waiting,
            3 => Self::Terminated,
            _ => Self::Idle,
        }
    }
}

/// Sentinel wait-remaining value meaning "no timeout" (spec §4.8:
/// "unlimited timeout uses a sentinel").
pub const NO_TIMEOUT: u64 = u64::MAX;

/// Callback stored alongside [`Thread::current_wait_target`]: removes
/// `thread` from the wait list of the dispatcher header or mutex pointed at
/// by its first argument, taking that object's own lock itself. Tagged
/// function pointer rather than a trait object (spec §9 "Dynamic
/// dispatch"), since `ev::dispatcher` and `ev::mutex` each have their own
/// concrete wait-list/lock type and neither is known to this module.
pub type WaitUnlinkFn = fn(NonNull<()>, NonNull<Thread>);

/// A kernel thread. Embeds exactly one [`ListLink`], reused for every
/// queue a thread can be on — ready queue, a dispatcher's wait list, or
/// the termination queue — since spec §3 guarantees those memberships are
/// mutually exclusive ("linkage node used by exactly one queue at a
/// time").
pub struct Thread {
    queue_link: ListLink,
    id: ThreadId,
    home_cpu: CpuId,
    state: AtomicU8,
    /// Ticks remaining in the current quantum; decremented on every clock
    /// tick while `Running`.
    pub quantum_remaining: AtomicU32,
    /// Absolute tick deadline this thread should be woken by, or
    /// [`NO_TIMEOUT`]. Only meaningful while `Waiting`.
    pub wake_deadline: AtomicU64,
    /// Set by the waker of the most recent wait: `true` if the tick handler
    /// expired the deadline, `false` if `set_signal`/mutex release woke it
    /// directly. Spec §4.8: "woken by timeout" and "woken by signal" are
    /// indistinguishable to the scheduler, but `wait_for_object`'s caller
    /// needs the distinction, so it reads this right after waking.
    woken_by_timeout: core::sync::atomic::AtomicBool,
    /// Back-reference to the dispatcher header or mutex whose wait list
    /// `queue_link` is currently linked into, or null if not on one right
    /// now (spec §9: "the thread's current_wait pointer is a
    /// back-reference only, never dereferenced after the waiter leaves the
    /// list"). Lets a CPU other than the one that queued this thread — the
    /// clock tick handler expiring a timeout on this thread's home CPU —
    /// find and take that object's own lock before `queue_link` gets reused
    /// for the ready queue.
    current_wait_target: AtomicPtr<()>,
    /// The function that knows how to remove this thread from
    /// `current_wait_target`'s wait list, set alongside it under that
    /// object's own lock.
    current_wait_unlink: AtomicPtr<()>,
    stack_base: VirtAddr,
    stack_limit: VirtAddr,
    context: UnsafeCell<ContextFrame>,
}

// SAFETY: every field is either a plain atomic or only ever touched while
// the owning CPU's ready-queue/wait-list lock is held, matching the
// convention `aurora_core::list` documents for `Linked` types stored in a
// lock-guarded `List`.
unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

impl_linked!(Thread, queue_link);

/// The object-manager type descriptor for threads (spec §3: "Ownership:
/// allocated through OB").
pub static THREAD_TYPE: TypeDescriptor = TypeDescriptor {
    name: "Thread",
    body_size: core::mem::size_of::<Thread>(),
    destructor: None,
};

/// The 4-byte tag OB-allocated threads are stamped with.
pub const THREAD_TAG: Tag = Tag::new(*b"Thrd");

impl Thread {
    /// Builds a new thread body in the `Ready` state with a full quantum,
    /// entering at `entry_trampoline` on first switch-in.
    ///
    /// Does not itself allocate through OB — callers place this value at
    /// the body pointer [`crate::ob::create`] returns.
    #[must_use]
    pub fn new(
        id: ThreadId,
        home_cpu: CpuId,
        stack_base: VirtAddr,
        stack_limit: VirtAddr,
        entry_trampoline: VirtAddr,
        quantum_ticks: u32,
    ) -> Self {
        Self {
            queue_link: ListLink::new(),
            id,
            home_cpu,
            state: AtomicU8::new(ThreadState::Ready as u8),
            quantum_remaining: AtomicU32::new(quantum_ticks),
            wake_deadline: AtomicU64::new(NO_TIMEOUT),
            woken_by_timeout: core::sync::atomic::AtomicBool::new(false),
            current_wait_target: AtomicPtr::new(core::ptr::null_mut()),
            current_wait_unlink: AtomicPtr::new(core::ptr::null_mut()),
            stack_base,
            stack_limit,
            context: UnsafeCell::new(ContextFrame::new_initial(entry_trampoline)),
        }
    }

    /// This thread's identifier.
    #[must_use]
    pub const fn id(&self) -> ThreadId {
        self.id
    }

    /// The CPU this thread is bound to; spec §4.7 does not perform
    /// cross-CPU migration.
    #[must_use]
    pub const fn home_cpu(&self) -> CpuId {
        self.home_cpu
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Sets the current state. Callers are expected to hold the owning
    /// CPU's lock; this type performs no locking of its own.
    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Returns `true` if this thread's [`ListLink`] is currently linked
    /// into some queue.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.queue_link.is_linked()
    }

    /// A pointer to this thread's saved [`ContextFrame`], for
    /// [`crate::arch::x86_64::context::switch_to`].
    #[must_use]
    pub fn context_ptr(&self) -> *mut ContextFrame {
        self.context.get()
    }

    /// The stack range this thread runs on.
    #[must_use]
    pub fn stack_range(&self) -> (VirtAddr, VirtAddr) {
        (self.stack_base, self.stack_limit)
    }

    /// Records that the tick handler woke this thread because its deadline
    /// passed, for [`crate::ev`] to report a timeout to the waiter.
    pub fn mark_woken_by_timeout(&self) {
        self.woken_by_timeout.store(true, Ordering::Release);
    }

    /// Records that this thread was woken directly (signal set, mutex
    /// handed over), clearing any stale timeout flag from a prior wait.
    pub fn mark_woken_by_signal(&self) {
        self.woken_by_timeout.store(false, Ordering::Release);
    }

    /// `true` if the most recent wake was a timeout rather than a signal.
    #[must_use]
    pub fn woken_by_timeout(&self) -> bool {
        self.woken_by_timeout.load(Ordering::Acquire)
    }

    /// Records that `queue_link` is about to be linked into `target`'s
    /// wait list, and the function that can later remove it from there.
    /// Callers must hold `target`'s own lock across both that link and
    /// this call.
    pub fn set_current_wait(&self, target: NonNull<()>, unlink: WaitUnlinkFn) {
        self.current_wait_target.store(target.as_ptr(), Ordering::Release);
        self.current_wait_unlink.store(unlink as *mut (), Ordering::Release);
    }

    /// Clears the back-reference without touching whatever wait list it
    /// names. For callers that already know this thread just left that
    /// list directly (the ordinary `set_signal`/mutex-release wake path).
    pub fn clear_current_wait(&self) {
        self.current_wait_target.store(core::ptr::null_mut(), Ordering::Release);
    }
}

/// If `thread` is still recorded as waiting on some dispatcher header or
/// mutex, removes it from that object's wait list under that object's own
/// lock and clears the back-reference; a no-op if it already left through
/// the ordinary wake path (which clears the back-reference itself). Spec
/// §4.8's timeout path ("remove it from the list and from its CPU's wait
/// tree") needs exactly this for the wait-list half — the wait-tree half
/// is the caller's job.
pub fn unlink_from_current_wait(thread: NonNull<Thread>) {
    // SAFETY: every caller of this function only ever has it in hand for a
    // live, OB-managed thread body (the wait tree, the ready queue).
    let this = unsafe { thread.as_ref() };
    let target = this.current_wait_target.swap(core::ptr::null_mut(), Ordering::AcqRel);
    let Some(target) = NonNull::new(target) else {
        return;
    };
    let unlink = this.current_wait_unlink.load(Ordering::Acquire);
    // SAFETY: only ever stored by `set_current_wait`, which always pairs a
    // `target` with a real `WaitUnlinkFn` in the same call.
    let unlink: WaitUnlinkFn = unsafe { core::mem::transmute(unlink) };
    unlink(target, thread);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr::NonNull;

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
    fn new_thread_starts_ready_with_full_quantum() {
        let t = sample(1);
        assert_eq!(t.state(), ThreadState::Ready);
        assert_eq!(t.quantum_remaining.load(Ordering::Relaxed), 20);
        assert_eq!(t.wake_deadline.load(Ordering::Relaxed), NO_TIMEOUT);
        assert!(!t.is_queued());
    }

    #[test]
    fn set_state_round_trips() {
        let t = sample(2);
        t.set_state(ThreadState::Running);
        assert_eq!(t.state(), ThreadState::Running);
        t.set_state(ThreadState::Waiting);
        assert_eq!(t.state(), ThreadState::Waiting);
    }

    #[test]
    fn linked_into_a_list_reports_queued() {
        let t = sample(3);
        let list: list::List<Thread> = list::List::new();
        unsafe { list.push_back(NonNull::from(&t)) };
        assert!(t.is_queued());
        unsafe { list.remove(NonNull::from(&t)) };
        assert!(!t.is_queued());
    }
}
