//! PS: the per-CPU scheduler (spec §4.7).
//!
//! `on_clock_tick` is the exact function `arch::x86_64::idt::dispatch_interrupt`
//! calls for [`crate::arch::x86_64::idt::CLOCK_VECTOR`]. It decrements the
//! running thread's quantum and, on exhaustion, runs the dispatch
//! algorithm: pop the ready queue's head (or the idle thread if empty),
//! and — unless the target is already current — swap `current` to ready,
//! `target` to running, and perform the register-save/restore context
//! switch.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use aurora_core::cpu_local::{current_cpu_id, CpuLocal, MAX_CPUS};
use aurora_core::id::CpuId;
use aurora_mm::pool::Pool;

use crate::irql::{self, Irql};
use crate::ob;
use crate::ps::ready_queue::ReadyQueue;
use crate::ps::thread::{Thread, ThreadState, THREAD_TAG};
use crate::ps::wait::{TerminationQueue, WaitTree};
use crate::sync::IrqlSpinLock;

/// One CPU's scheduler state (spec §3 "Processor record", the scheduling
/// subset of it — the rest of the processor record lives in `boot`/`arch`).
struct PerCpuScheduler {
    current: AtomicPtr<Thread>,
    idle: AtomicPtr<Thread>,
    ready: ReadyQueue,
    wait_tree: WaitTree,
    termination: TerminationQueue,
    /// Serializes the dispatch algorithm's read-modify-write of
    /// `current`/ready-queue membership (spec §4.7: "transitions are
    /// guarded by the CPU lock").
    dispatch_lock: IrqlSpinLock<()>,
}

impl PerCpuScheduler {
    const fn new() -> Self {
        Self {
            current: AtomicPtr::new(core::ptr::null_mut()),
            idle: AtomicPtr::new(core::ptr::null_mut()),
            ready: ReadyQueue::new(),
            wait_tree: WaitTree::new(),
            termination: TerminationQueue::new(),
            dispatch_lock: IrqlSpinLock::new(()),
        }
    }
}

// SAFETY: every field is either a plain atomic, or a type whose own
// locking already makes cross-CPU access to `get_for` sound.
unsafe impl Send for PerCpuScheduler {}
unsafe impl Sync for PerCpuScheduler {}

static SCHEDULERS: CpuLocal<PerCpuScheduler> =
    CpuLocal::new([const { PerCpuScheduler::new() }; MAX_CPUS]);

static TICKS: AtomicU64 = AtomicU64::new(0);

/// The kernel's monotonic tick counter, advanced once per [`on_clock_tick`]
/// on the boot CPU's timer (spec §4.6: "a periodic interrupt at every tick
/// period... drives timed waits and quantum expiry").
#[must_use]
pub fn current_tick() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Registers `idle` as the calling CPU's dedicated idle thread and makes
/// it current. Called once per CPU during bring-up.
pub fn init_cpu(idle: NonNull<Thread>) {
    let sched = SCHEDULERS.get();
    sched.idle.store(idle.as_ptr(), Ordering::Release);
    sched.current.store(idle.as_ptr(), Ordering::Release);
    // SAFETY: caller guarantees `idle` is a live, stable thread.
    unsafe { idle.as_ref() }.set_state(ThreadState::Idle);
}

/// Returns the calling CPU's currently running thread, if bring-up has
/// run [`init_cpu`] already.
#[must_use]
pub fn current_thread() -> Option<NonNull<Thread>> {
    NonNull::new(SCHEDULERS.get().current.load(Ordering::Acquire))
}

/// Places `thread` on the calling CPU's ready queue.
///
/// # Safety
///
/// `thread` must not already be linked into any queue, and must be bound
/// to the calling CPU (spec §4.7: threads do not migrate).
pub unsafe fn enqueue_ready(thread: NonNull<Thread>) {
    // SAFETY: forwarded from this function's contract; the calling CPU is
    // `thread`'s home CPU by that same contract.
    unsafe { enqueue_ready_on(CpuId::new(current_cpu_id()), thread) };
}

/// Places `thread` on `cpu`'s ready queue. The general form of
/// [`enqueue_ready`], usable cross-CPU: spec §5's concurrency table allows
/// a per-CPU queue's lock to be "acquired cross-CPU only to enqueue", the
/// case [`crate::ev::set_signal`] needs when waking a waiter whose home CPU
/// differs from the waking CPU.
///
/// # Safety
///
/// `thread` must not already be linked into any queue, and must be bound to
/// `cpu`.
pub unsafe fn enqueue_ready_on(cpu: CpuId, thread: NonNull<Thread>) {
    // SAFETY: forwarded from this function's contract.
    unsafe { thread.as_ref() }.set_state(ThreadState::Ready);
    let sched = SCHEDULERS.get_for(cpu.as_u32());
    // SAFETY: forwarded from this function's contract.
    unsafe { sched.ready.push_back(thread) };
}

/// Registers the calling CPU's currently running thread as waiting until
/// `deadline` (or forever, for [`crate::ps::thread::NO_TIMEOUT`]). Called by
/// [`crate::ev::wait_for_object`] after linking the thread onto a
/// dispatcher's wait list, before it lowers IRQL and yields.
pub fn track_wait(thread: NonNull<Thread>, deadline: u64) {
    let sched = SCHEDULERS.get();
    // A full wait tree only means this particular wait won't be found by
    // the tick handler's timeout scan; the thread still wakes normally via
    // `wake_waiter` once its dispatcher is signalled.
    let _ = sched.wait_tree.insert(thread, deadline);
}

/// Removes `thread` from its home CPU's wait tree, moves it back to ready on
/// that same CPU, and notifies the CPU if it might be idling. The one
/// operation in this module callers are expected to invoke cross-CPU: spec
/// §4.8's `set_signal` walks a dispatcher's wait list and wakes each waiter
/// this way regardless of which CPU is running `set_signal`.
///
/// # Safety
///
/// `thread` must have just been unlinked from the dispatcher wait list it
/// was waiting on (by the caller, under that dispatcher's lock), and must
/// not be linked into any other queue.
pub unsafe fn wake_waiter(thread: NonNull<Thread>) {
    // SAFETY: thread is a live, OB-managed thread body.
    let thread_ref = unsafe { thread.as_ref() };
    thread_ref.mark_woken_by_signal();
    // The caller already unlinked `thread` from the dispatcher/mutex wait
    // list directly, so the back-reference just needs clearing, not acted
    // on (spec §9: never dereferenced after the waiter leaves the list).
    thread_ref.clear_current_wait();
    let cpu = thread_ref.home_cpu();
    SCHEDULERS.get_for(cpu.as_u32()).wait_tree.remove(thread);
    // SAFETY: forwarded from this function's contract.
    unsafe { enqueue_ready_on(cpu, thread) };
    notify_if_idle(cpu);
}

/// Moves the calling CPU's current thread to `Terminated` and onto the
/// termination queue, then yields — the switch-out path itself never runs
/// a destructor (spec §4.7: "two-phase... fully freed only by a low-priority
/// reaper routine running when idle").
///
/// # Safety
///
/// Must be called by the thread terminating itself, running on its own home
/// CPU.
pub unsafe fn terminate_thread(thread: NonNull<Thread>) {
    let sched = SCHEDULERS.get();
    // SAFETY: `thread` is the calling CPU's own current thread.
    unsafe { thread.as_ref() }.set_state(ThreadState::Terminated);
    // SAFETY: forwarded from this function's contract: `thread` is not
    // linked anywhere else, having just been `Running`.
    unsafe { sched.termination.push(thread) };
    yield_now();
}

/// Pops one thread from the calling CPU's termination queue and returns its
/// object-manager storage to `pool`, running `Thread`'s (absent) destructor
/// as part of the final dereference. Returns `true` if a thread was reaped.
///
/// The idle thread calls this in its hint-to-pause loop (spec §4.7: "the
/// idle thread is per-CPU... polling its own ready queue between pauses",
/// extended here to also drain its own termination queue, matching "a
/// low-priority reaper routine running when idle").
///
/// # Safety
///
/// Every thread ever pushed onto this CPU's termination queue must have been
/// allocated through [`crate::ob::create`] with [`THREAD_TAG`] and must hold
/// exactly the one outstanding reference that ownership transfer here drops.
pub unsafe fn reap_one(pool: &Pool<'_>, cpu_index: usize) -> bool {
    let sched = SCHEDULERS.get();
    let Some(thread) = sched.termination.pop() else {
        return false;
    };
    let body = thread.cast::<u8>();
    // SAFETY: forwarded from this function's contract.
    let _ = unsafe { ob::dereference(pool, cpu_index, body, THREAD_TAG) };
    true
}

/// One iteration of the idle thread's body: reap everything currently
/// queued for termination, then either yield immediately (ready queue has
/// work) or execute one hint-to-pause cycle.
///
/// # Safety
///
/// Same contract as [`reap_one`]; must be called only from the calling
/// CPU's own idle thread.
pub unsafe fn idle_loop_step(pool: &Pool<'_>, cpu_index: usize) {
    // SAFETY: forwarded from this function's contract.
    while unsafe { reap_one(pool, cpu_index) } {}
    if SCHEDULERS.get().ready.is_empty() {
        core::hint::spin_loop();
    } else {
        yield_now();
    }
}

/// The exact function `dispatch_interrupt` invokes for the clock vector.
/// Decrements the current thread's quantum; on exhaustion, runs the
/// dispatch algorithm.
pub fn on_clock_tick() {
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    wake_expired_waiters();
    crate::ev::timer::fire_expired_current_cpu(now);

    let sched = SCHEDULERS.get();
    let Some(current) = NonNull::new(sched.current.load(Ordering::Acquire)) else {
        return;
    };
    // SAFETY: `current` was stored by `init_cpu`/`dispatch` and is kept
    // alive for the lifetime of the kernel (threads are reaped, never
    // freed while current).
    let remaining = unsafe { current.as_ref() }
        .quantum_remaining
        .fetch_sub(1, Ordering::AcqRel);
    if remaining <= 1 {
        dispatch(DEFAULT_QUANTUM_RESET);
    }
}

const DEFAULT_QUANTUM_RESET: u32 = crate::config::DEFAULT_QUANTUM_TICKS;

fn wake_expired_waiters() {
    let sched = SCHEDULERS.get();
    let expired = sched.wait_tree.take_expired(current_tick());
    for thread in expired.as_slice() {
        // Still linked into whichever dispatcher header's or mutex's wait
        // list it was blocked on (spec §4.8's timeout path: "remove it from
        // the list and from its CPU's wait tree") — unlink it there first,
        // before `queue_link` gets reused for the ready queue below.
        crate::ps::thread::unlink_from_current_wait(*thread);
        // SAFETY: every entry in the wait tree is a live thread placed
        // there by `crate::ev::wait_for_object`.
        unsafe { thread.as_ref() }.mark_woken_by_timeout();
        unsafe { enqueue_ready(*thread) };
    }
}

/// Picks the next thread to run — the ready queue's head, or the idle
/// thread if empty (spec §4.7 step 1). Pure/host-testable: takes no lock
/// and touches no hardware.
fn pick_target(ready: &ReadyQueue, idle: NonNull<Thread>) -> NonNull<Thread> {
    ready.pop_front().unwrap_or(idle)
}

/// Runs the dispatch algorithm (spec §4.7 steps 1-3), resetting the
/// outgoing thread's quantum to `new_quantum` if it returns to the ready
/// queue.
fn dispatch(new_quantum: u32) {
    let sched = SCHEDULERS.get();
    let _guard = sched.dispatch_lock.acquire_and_raise(Irql::DISPATCH);

    let Some(current) = NonNull::new(sched.current.load(Ordering::Acquire)) else {
        return;
    };
    let idle = NonNull::new(sched.idle.load(Ordering::Acquire)).unwrap_or(current);
    let target = pick_target(&sched.ready, idle);

    if target == current {
        // SAFETY: `current` is the live running thread.
        unsafe { current.as_ref() }
            .quantum_remaining
            .store(new_quantum, Ordering::Release);
        return;
    }

    // SAFETY: `current` is live; queue it unless it already left
    // `Running` on its own (terminated, or about to wait).
    let current_ref = unsafe { current.as_ref() };
    if current_ref.state() == ThreadState::Running {
        current_ref.quantum_remaining.store(new_quantum, Ordering::Release);
        current_ref.set_state(ThreadState::Ready);
        // SAFETY: `current` is not linked anywhere else right now — it
        // was the CPU's running thread.
        unsafe { sched.ready.push_back(current) };
    }

    // SAFETY: `target` came from this CPU's own ready queue or is its own
    // idle thread.
    unsafe { target.as_ref() }.set_state(ThreadState::Running);
    sched.current.store(target.as_ptr(), Ordering::Release);

    perform_switch(current, target);
}

/// Voluntarily gives up the CPU, e.g. from `ev::wait_for_object` after the
/// caller has already transitioned itself to `Waiting` and lowered IRQL.
/// Runs the same dispatch algorithm as a clock-driven reschedule.
pub fn yield_now() {
    dispatch(DEFAULT_QUANTUM_RESET);
}

/// Notifies `cpu` that it has new ready-queue work, for the case where it
/// might currently be idling in a hint-to-pause loop (spec §4.7, §4.8:
/// `set_signal` "if that CPU is idle, notify it").
pub fn notify_if_idle(cpu: CpuId) {
    if cpu.as_u32() == current_cpu_id() {
        return;
    }
    crate::ke::ipi::notify(cpu, Irql::DISPATCH);
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
fn perform_switch(from: NonNull<Thread>, to: NonNull<Thread>) {
    // SAFETY: both threads are live, bound to this CPU, and the dispatch
    // lock above ensures no other path concurrently switches either one.
    unsafe {
        crate::arch::x86_64::context::switch_to(from.as_ref().context_ptr(), to.as_ref().context_ptr());
    }
    let _ = irql::lower(irql::get_irql());
}

#[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
fn perform_switch(_from: NonNull<Thread>, _to: NonNull<Thread>) {
    // No real stacks to switch between on the host test target; the
    // bookkeeping above (state, ready-queue membership, `current`) is the
    // part under test there.
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_core::addr::VirtAddr;
    use aurora_core::id::ThreadId;
    use std::sync::Mutex as StdMutex;

    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    fn reset() -> std::sync::MutexGuard<'static, ()> {
        let guard = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let _ = irql::lower(Irql::PASSIVE);
        guard
    }

    fn sample(id: u64) -> Thread {
        Thread::new(
            ThreadId::new(id),
            CpuId::new(0),
            VirtAddr::zero(),
            VirtAddr::new_truncate(0x1000),
            VirtAddr::new_truncate(0x2000),
            2,
        )
    }

    #[test]
    fn pick_target_falls_back_to_idle_when_ready_queue_empty() {
        let _serial = reset();
        let ready = ReadyQueue::new();
        let idle = sample(99);
        let target = pick_target(&ready, NonNull::from(&idle));
        assert_eq!(unsafe { target.as_ref() }.id(), ThreadId::new(99));
    }

    #[test]
    fn pick_target_prefers_ready_queue_head() {
        let _serial = reset();
        let ready = ReadyQueue::new();
        let idle = sample(99);
        let a = sample(1);
        unsafe { ready.push_back(NonNull::from(&a)) };
        let target = pick_target(&ready, NonNull::from(&idle));
        assert_eq!(unsafe { target.as_ref() }.id(), ThreadId::new(1));
    }

    #[test]
    fn init_cpu_makes_idle_current() {
        let _serial = reset();
        let idle = sample(7);
        init_cpu(NonNull::from(&idle));
        let current = current_thread().unwrap();
        assert_eq!(unsafe { current.as_ref() }.id(), ThreadId::new(7));
        assert_eq!(unsafe { current.as_ref() }.state(), ThreadState::Idle);
    }

    #[test]
    fn clock_tick_decrements_quantum_without_exhausting() {
        let _serial = reset();
        let idle = sample(8);
        init_cpu(NonNull::from(&idle));
        idle.quantum_remaining.store(5, Ordering::Relaxed);
        idle.set_state(ThreadState::Running);
        on_clock_tick();
        assert_eq!(idle.quantum_remaining.load(Ordering::Relaxed), 4);
    }
}
