//! Compile-time kernel configuration.
//!
//! A single source of truth for the tunables the rest of the kernel reaches
//! for by name, mirroring the teacher's own `config.rs` bridge module. Unlike
//! the teacher, nothing here is generated by a build script — these are
//! small enough to live as plain `const`s.

/// Maximum number of logical CPUs this kernel supports.
///
/// Matches [`aurora_core::cpu_local::MAX_CPUS`]; re-stated here as the
/// number every per-CPU array in this crate is sized by.
pub const MAX_CPUS: usize = aurora_core::cpu_local::MAX_CPUS;

/// Default kernel thread quantum, in timer ticks (spec §4.7).
pub const DEFAULT_QUANTUM_TICKS: u32 = 20;

/// Platform timer tick period, in nanoseconds (spec §4.6: "default 1 ms").
pub const TICK_PERIOD_NANOS: u64 = 1_000_000;

/// Size, in bytes, of each thread's kernel stack.
pub const KERNEL_STACK_SIZE: usize = 64 * 1024;

/// Size, in bytes, of each CPU's dedicated NMI stack.
pub const NMI_STACK_SIZE: usize = 16 * 1024;

/// Size, in bytes, of each CPU's dedicated double-fault stack.
pub const DOUBLE_FAULT_STACK_SIZE: usize = 16 * 1024;

/// Size, in bytes, of each CPU's dedicated machine-check stack.
pub const MACHINE_CHECK_STACK_SIZE: usize = 16 * 1024;

/// Maximum number of dynamically assignable driver interrupt vectors
/// (spec §4.6).
pub const MAX_DYNAMIC_VECTORS: usize = 64;

/// Bounded retry count for the atomic singly linked list's hazard-window
/// pop, per spec §5 and §9 ("keep the bounded retry (1024) as an explicit
/// contract").
pub const ATOMIC_LIST_RETRY_LIMIT: u32 = 1024;

/// Maximum number of distinct pool tags tracked for diagnostics; mirrors
/// [`aurora_mm::pool`]'s own limit so the two stay in lockstep.
pub const MAX_TRACKED_POOL_TAGS: usize = 256;

/// Maximum number of memory descriptor ranges `boot` snapshots out of the
/// loader hand-off's linked list before building the page database.
pub const MAX_MEMORY_RANGES: usize = 64;

/// Maximum physical page number `boot`'s page frame database covers.
///
/// Bounds the static array reserved for [`aurora_mm::pfdb::PageFrameDatabase`]'s
/// backing storage (4 KiB pages, so 262144 frames covers 1 GiB of tracked
/// physical memory). Loader-reported pages above this bound are left
/// untracked rather than having storage carved for them, since nothing in
/// this tree can carve storage out of physical memory at boot time without
/// a physical-to-virtual translator.
pub const MAX_TRACKED_PAGES: usize = 262_144;

/// Poisons freed pool and page allocations with a fixed byte pattern to turn
/// use-after-free into an immediate, visible corruption rather than a latent
/// one. Off by default; costs a write per free.
#[cfg(feature = "debug-pool-poison")]
pub const POOL_POISON_BYTE: u8 = 0xDE;

/// Tracks acquire/release ordering of every [`crate::sync::IrqlSpinLock`] to
/// detect lock-order inversions before they deadlock. Off by default; adds a
/// per-CPU held-lock stack.
#[cfg(feature = "lockdep")]
pub const LOCKDEP_MAX_HELD_LOCKS: usize = 16;
