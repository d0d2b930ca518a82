//! Kernel entry point: the boot processor's path from the loader hand-off
//! to its own idle loop.
//!
//! [`init`] is the one function an external entry stub (the binary crate
//! that links this library against the UEFI loader's jump target) ever
//! calls. Everything it does runs on the boot processor alone, in the
//! fixed order the loader hand-off implies: validate the hand-off record,
//! snapshot memory, bring up the page database, the KASLR arena, and the
//! pool allocator, bring the boot processor's own hardware state up (GDT,
//! IDT, per-CPU data, Local APIC), hand ACPI its root table, then build and
//! enter the idle thread.
//!
//! Three things a from-scratch hand-off would normally still need are out
//! of scope here, each for a concrete reason recorded in `DESIGN.md`:
//! application-processor bring-up (no real-mode trampoline page and no
//! MADT entry parser exist anywhere in this tree), I/O APIC interrupt
//! routing (same missing MADT parser), and a calibrated timer tick (no
//! legacy PIT/HPET driver exists to calibrate the Local APIC timer
//! against).

use core::ptr::NonNull;

use aurora_core::addr::{PhysAddr, VirtAddr};
use aurora_core::id::{CpuId, ThreadId};
use aurora_core::panic_code::PanicCode;
use aurora_mm::arena::{Arena, SeedSource};
use aurora_mm::pfdb::{MemoryRange, PageFrameDatabase};
use aurora_mm::pool::Pool;
use aurora_noalloc::vec::ArrayVec;

use crate::arch::x86_64::hw::tsc;
use crate::arch::x86_64::{self, instructions};
use crate::config::{MAX_MEMORY_RANGES, MAX_TRACKED_PAGES};
use crate::drivers::acpi;
use crate::ke::ipi;
use crate::ke::panic::fatal_error;
use crate::ob;
use crate::ps::scheduler;
use crate::ps::thread::{Thread, THREAD_TAG, THREAD_TYPE};
use crate::{kprintln, kwarn};
use aurora_core::boot::{LoaderBlock, MemoryDescriptorKind, MemoryDescriptorNode};

/// Virtual base the KASLR arena's slabs are carved from. Arbitrary but
/// fixed: nothing else in this tree yet consumes the arena, so there is no
/// existing convention to match beyond staying in canonical kernel space.
const ARENA_BASE: VirtAddr = VirtAddr::new_truncate(0xFFFF_9000_0000_0000);

static mut PFDB_STORAGE: [u8; PageFrameDatabase::storage_bytes_for(MAX_TRACKED_PAGES)] =
    [0; PageFrameDatabase::storage_bytes_for(MAX_TRACKED_PAGES)];

static mut PAGE_DB: Option<PageFrameDatabase> = None;
static mut ARENA: Option<Arena> = None;
static mut POOL: Option<Pool<'static>> = None;

fn page_db() -> &'static PageFrameDatabase {
    // SAFETY: only written once, by `init`, before this is ever called.
    unsafe { (*core::ptr::addr_of!(PAGE_DB)).as_ref() }
        .expect("page database read before boot::init built it")
}

fn pool() -> &'static Pool<'static> {
    // SAFETY: only written once, by `init`, before this is ever called.
    unsafe { (*core::ptr::addr_of!(POOL)).as_ref() }.expect("pool read before boot::init built it")
}

/// Walks the loader's doubly linked memory descriptor list into a bounded
/// snapshot, dropping (and logging) anything past [`MAX_MEMORY_RANGES`].
///
/// # Safety
///
/// `loader_block.memory_descriptor_head`, and every `next` pointer reached
/// by following it, must address a live [`MemoryDescriptorNode`] already
/// mapped into this address space, per the loader hand-off contract.
unsafe fn snapshot_memory_ranges(
    loader_block: &LoaderBlock,
) -> ArrayVec<MemoryRange, MAX_MEMORY_RANGES> {
    let mut ranges = ArrayVec::new();
    let mut cursor = loader_block.memory_descriptor_head;
    while let Some(addr) = cursor {
        // SAFETY: forwarded from this function's contract.
        let node = unsafe { &*addr.as_ptr::<MemoryDescriptorNode>() };
        let usable = matches!(node.kind, MemoryDescriptorKind::Free);
        let range = MemoryRange {
            base_page: node.base_page,
            page_count: node.page_count,
            usable,
        };
        if ranges.try_push(range).is_err() {
            kwarn!(
                "boot: memory descriptor list exceeds {} ranges, remainder dropped",
                MAX_MEMORY_RANGES
            );
            break;
        }
        cursor = node.next;
    }
    ranges
}

/// Highest page number any range reaches, clamped to [`MAX_TRACKED_PAGES`].
fn tracked_frame_count(ranges: &[MemoryRange]) -> usize {
    let highest = ranges
        .iter()
        .map(|r| r.base_page.saturating_add(r.page_count))
        .max()
        .unwrap_or(0);
    if highest > MAX_TRACKED_PAGES as u64 {
        kwarn!(
            "boot: loader reports pages up to {highest}, tracking only the first {MAX_TRACKED_PAGES}"
        );
        MAX_TRACKED_PAGES
    } else {
        highest as usize
    }
}

/// Identity-maps every physical address: the one translator this kernel
/// can offer ACPI until a real virtual memory manager exists.
fn identity_translate(addr: PhysAddr, len: usize) -> Option<&'static [u8]> {
    // SAFETY: no VMM exists in this tree; every physical address the loader
    // or ACPI hands back is assumed identity-mapped into kernel space, the
    // same assumption `arch::x86_64::init_boot_processor` makes for the
    // Local APIC's MMIO page.
    Some(unsafe { core::slice::from_raw_parts(addr.as_u64() as *const u8, len) })
}

/// Brings ACPI online against whatever root table the loader found, or
/// logs and continues without it. ACPI failure is not fatal: it only
/// gates driver discovery (PCI enumeration, interrupt routing), none of
/// which this build performs yet.
fn init_acpi(loader_block: &LoaderBlock) {
    let Some(rsdp_phys) = loader_block.acpi_table else {
        kwarn!("boot: loader hand-off carries no ACPI root table");
        return;
    };
    acpi::set_translator(identity_translate);
    match acpi::init(rsdp_phys) {
        Ok(()) => kprintln!("boot: ACPI root table validated at {rsdp_phys:?}"),
        Err(e) => kwarn!("boot: ACPI init failed: {e:?}"),
    }
}

/// Builds the boot CPU's idle thread through the object manager and makes
/// it the scheduler's current thread. Never switched into fresh — the
/// calling stack (this very call, from [`init`]) already *is* its first
/// execution, so its stack bounds and entry trampoline exist only for a
/// hypothetical future switch back in, never for a first switch.
fn spawn_idle_thread() -> NonNull<Thread> {
    // SAFETY: `THREAD_TYPE.body_size` is `size_of::<Thread>()`, and the
    // returned pointer is written with a fully initialized `Thread` below
    // before anything else reads it.
    let body = unsafe { ob::create(pool(), 0, &THREAD_TYPE, THREAD_TAG) }
        .unwrap_or_else(|e| fatal_error(PanicCode::InstallMoreMemory, 0, 0, 0, e_as_u64(e)));
    let entry = VirtAddr::new_truncate(idle_entry as usize as u64);
    let thread = Thread::new(
        ThreadId::new(0),
        CpuId::new(0),
        VirtAddr::zero(),
        VirtAddr::zero(),
        entry,
        crate::config::DEFAULT_QUANTUM_TICKS,
    );
    // SAFETY: `body` is freshly allocated, uninitialized, and exactly
    // `size_of::<Thread>()` bytes, per `create`'s contract.
    unsafe { body.cast::<Thread>().as_ptr().write(thread) };
    body.cast::<Thread>()
}

fn e_as_u64(e: ob::ObError) -> u64 {
    match e {
        ob::ObError::Pool(_) => 1,
    }
}

/// The boot CPU's idle thread body. Reaps terminated threads and spins or
/// yields depending on whether the ready queue has work, forever.
extern "C" fn idle_entry() -> ! {
    loop {
        // SAFETY: this is CPU 0's own idle thread, running on CPU 0.
        unsafe { scheduler::idle_loop_step(pool(), 0) };
    }
}

/// Brings the boot processor from the loader's hand-off to its own idle
/// loop. Never returns.
///
/// # Safety
///
/// Must be called exactly once, on the boot processor, before any other
/// kernel code runs, with a `loader_block` the loader populated according
/// to its hand-off contract.
pub unsafe fn init(loader_block: &'static LoaderBlock) -> ! {
    crate::log::init_early();
    kprintln!("Aurora kernel boot: loader block at {:p}", loader_block);

    if let Err(e) = loader_block.validate() {
        fatal_error(PanicCode::BadSystemTable, e_code(e), 0, 0, 0);
    }

    // SAFETY: the loader hand-off contract guarantees the list this walks
    // is live and mapped.
    let ranges = unsafe { snapshot_memory_ranges(loader_block) };
    let frame_count = tracked_frame_count(ranges.as_slice());
    if frame_count == 0 {
        fatal_error(PanicCode::InstallMoreMemory, 0, 0, 0, 0);
    }

    // SAFETY: `PFDB_STORAGE` is `'static`, sized for `MAX_TRACKED_PAGES`
    // frames by construction, and not aliased anywhere else; `init` runs
    // exactly once, here.
    let db = unsafe {
        let storage = core::ptr::addr_of_mut!(PFDB_STORAGE).as_mut().unwrap();
        PageFrameDatabase::init(storage, 0, frame_count, 1, ranges.as_slice())
    };
    // SAFETY: single-threaded boot; nothing else observes `PAGE_DB` until
    // this write completes.
    unsafe { *core::ptr::addr_of_mut!(PAGE_DB) = Some(db) };
    kprintln!("boot: page database online, {frame_count} frames tracked");

    let seed = tsc::read_tsc();
    kwarn!("boot: no hardware/firmware entropy source wired, seeding the arena from the cycle counter");
    let arena = Arena::new(
        ARENA_BASE,
        aurora_mm::arena::SLAB_SIZE,
        aurora_mm::arena::SLAB_COUNT,
        seed,
        SeedSource::CycleCounterFallback,
    );
    // SAFETY: single-threaded boot; nothing else observes `ARENA` until
    // this write completes.
    unsafe { *core::ptr::addr_of_mut!(ARENA) = Some(arena) };

    let pool = Pool::new(page_db());
    // SAFETY: single-threaded boot; nothing else observes `POOL` until
    // this write completes.
    unsafe { *core::ptr::addr_of_mut!(POOL) = Some(pool) };
    kprintln!("boot: pool allocator online");

    // SAFETY: called once, before interrupts are enabled and before any
    // other CPU is started.
    unsafe { x86_64::init_boot_processor() };
    kprintln!("boot: GDT/IDT/per-CPU/Local APIC online");

    init_acpi(loader_block);

    // No MADT entry parser and no real-mode AP trampoline exist anywhere
    // in this tree; application-processor bring-up is out of scope.
    ipi::set_online_cpu_count(1);
    kprintln!("boot: single-processor (no AP bring-up path wired)");

    let idle = spawn_idle_thread();
    scheduler::init_cpu(idle);
    kprintln!("boot: CPU 0 idle thread online, enabling interrupts");

    // SAFETY: GDT/IDT/per-CPU state and the scheduler's idle thread are
    // all in place.
    unsafe { instructions::enable_interrupts() };
    idle_entry()
}

fn e_code(e: aurora_core::boot::LoaderBlockError) -> u64 {
    match e {
        aurora_core::boot::LoaderBlockError::BadMagic => 0,
        aurora_core::boot::LoaderBlockError::UnsupportedVersion(v) => v,
    }
}
