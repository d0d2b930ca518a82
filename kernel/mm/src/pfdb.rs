//! Physical page frame database and per-CPU free lists.
//!
//! Spec §4.3: at initialization the memory descriptor list is walked, one
//! [`PageEntry`] is allocated per physical page, entries are marked
//! according to their descriptor's tag, and all free pages are threaded
//! into per-CPU free lists, distributed round-robin so every CPU starts
//! bring-up with a working cache. `alloc_page`/`free_page` maintain the
//! invariant `used(p) XOR on_some_free_list(p)` for every page `p`.

use core::sync::atomic::{AtomicUsize, Ordering};

use aurora_core::addr::PhysAddr;
use aurora_core::cpu_local::MAX_CPUS;
use aurora_core::id::Tag;
use aurora_core::sync::SpinLock;

const FRAME_SIZE: u64 = 4096;

/// What a single physical page is currently doing.
///
/// `Free` pages are singly linked through `next`, scoped to whichever CPU's
/// free list they are threaded onto. The invariant from spec §3 — `used(p)
/// ⇒ exactly one of {pool-base, pool-item, contig-base, contig-item,
/// standalone}` — is enforced by construction: this is an enum, not a set
/// of independent flags, so two "used" kinds can never both be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageState {
    Free { next: Option<u32> },
    Standalone,
    PoolBase { tag: Tag, page_count: u32 },
    PoolItem,
    ContigBase { tag: Tag, page_count: u64 },
    ContigItem,
}

/// One entry in the page database, one per physical frame.
#[derive(Clone, Copy)]
struct PageEntry {
    state: PageState,
}

impl PageEntry {
    const fn free(next: Option<u32>) -> Self {
        Self {
            state: PageState::Free { next },
        }
    }

    const fn is_free(&self) -> bool {
        matches!(self.state, PageState::Free { .. })
    }
}

/// Errors the physical memory manager can report.
///
/// Per spec §7: `OutOfMemory`/`NoRun` are category-1 recoverable conditions
/// the caller must check and propagate; `BadPfnHeader` is a category-2
/// invariant violation the caller must escalate to `fatal_error` with
/// [`aurora_core::panic_code::PanicCode::BadPfnHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmmError {
    /// No free page was available anywhere in the system.
    OutOfMemory,
    /// No run of `count` contiguous, suitably aligned free pages exists.
    NoContiguousRun,
    /// `free_page`/`free_contig` was called on a page that was not `used`,
    /// or that carried a pool/contig flag the free path did not expect.
    BadPfnHeader {
        /// Physical address of the offending page.
        addr: PhysAddr,
    },
}

/// A descriptor of one physical memory range, as produced from the loader's
/// memory descriptor list (spec §3/§6) after the kernel snapshots it.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRange {
    /// First physical page number.
    pub base_page: u64,
    /// Number of pages in the range.
    pub page_count: u64,
    /// Whether this range is available for the free lists.
    pub usable: bool,
}

/// The physical page frame database.
///
/// `entries` is a raw, statically sized view over memory set aside by the
/// caller during early boot (mirroring the teacher's own HHDM-backed bitmap:
/// there is no allocator yet, so the database's own backing storage must be
/// carved out of a usable memory range by hand before this type exists).
pub struct PageFrameDatabase {
    entries: &'static mut [PageEntry],
    free_lists: [SpinLock<FreeList>; MAX_CPUS],
    num_cpus: usize,
    base_page: u64,
    free_count: AtomicUsize,
}

#[derive(Clone, Copy, Default)]
struct FreeList {
    head: Option<u32>,
    count: usize,
}

impl PageFrameDatabase {
    /// Number of storage bytes [`Self::init`] needs for `frame_count`
    /// frames. Callers sizing a static or boot-time-reserved backing array
    /// have no other way to learn this, since `PageEntry` is private.
    #[must_use]
    pub const fn storage_bytes_for(frame_count: usize) -> usize {
        frame_count * core::mem::size_of::<PageEntry>()
    }

    /// Builds a page database over raw storage obtained from `storage`, a
    /// byte slice at least `frame_count * size_of::<PageEntry>()` long.
    ///
    /// # Safety
    ///
    /// `storage` must be valid for the `'static` lifetime and not aliased by
    /// any other reference. Must be called exactly once, before any
    /// application processor starts allocating.
    pub unsafe fn init(
        storage: &'static mut [u8],
        base_page: u64,
        frame_count: usize,
        num_cpus: usize,
        ranges: &[MemoryRange],
    ) -> Self {
        assert!(num_cpus >= 1 && num_cpus <= MAX_CPUS);
        let entry_size = core::mem::size_of::<PageEntry>();
        assert!(storage.len() >= frame_count * entry_size);

        // SAFETY: storage is `'static`, large enough, and exclusively owned
        // per the caller's contract; PageEntry has no padding-sensitive
        // invariants that a zeroed-then-written slice would violate because
        // every slot is written below before being read.
        let entries: &'static mut [PageEntry] = unsafe {
            core::slice::from_raw_parts_mut(storage.as_mut_ptr().cast::<PageEntry>(), frame_count)
        };

        for entry in entries.iter_mut() {
            entry.state = PageState::Standalone;
        }
        for range in ranges.iter().filter(|r| r.usable) {
            let start = range.base_page.saturating_sub(base_page) as usize;
            let end = (start + range.page_count as usize).min(entries.len());
            for entry in entries[start..end].iter_mut() {
                entry.state = PageState::Free { next: None };
            }
        }

        let free_lists: [SpinLock<FreeList>; MAX_CPUS] =
            core::array::from_fn(|_| SpinLock::new(FreeList::default()));
        let mut free_count = 0usize;
        for (idx, entry) in entries.iter_mut().enumerate() {
            if entry.is_free() {
                let cpu = idx % num_cpus;
                let mut list = free_lists[cpu].lock();
                entry.state = PageState::Free { next: list.head };
                list.head = Some(idx as u32);
                list.count += 1;
                free_count += 1;
            }
        }

        Self {
            entries,
            free_lists,
            num_cpus,
            base_page,
            free_count: AtomicUsize::new(free_count),
        }
    }

    fn frame_index(&self, addr: PhysAddr) -> usize {
        (addr.as_u64() / FRAME_SIZE - self.base_page) as usize
    }

    fn frame_addr(&self, index: usize) -> PhysAddr {
        PhysAddr::new((self.base_page + index as u64) * FRAME_SIZE)
    }

    /// Pops one frame from `cpu`'s free list, stealing from a sibling CPU
    /// when the local list is empty. Returns `None` on total exhaustion.
    fn pop_free(&self, cpu: usize) -> Option<u32> {
        {
            let mut list = self.free_lists[cpu].lock();
            if let Some(idx) = list.head {
                let next = match self.entries[idx as usize].state {
                    PageState::Free { next } => next,
                    _ => unreachable!("free list pointed at a non-free entry"),
                };
                list.head = next;
                list.count -= 1;
                return Some(idx);
            }
        }
        for offset in 1..self.num_cpus {
            let sibling = (cpu + offset) % self.num_cpus;
            let mut list = self.free_lists[sibling].lock();
            if let Some(idx) = list.head {
                let next = match self.entries[idx as usize].state {
                    PageState::Free { next } => next,
                    _ => unreachable!("free list pointed at a non-free entry"),
                };
                list.head = next;
                list.count -= 1;
                return Some(idx);
            }
        }
        None
    }

    fn push_free(&self, cpu: usize, index: u32) {
        let mut list = self.free_lists[cpu].lock();
        self.entries[index as usize].state = PageState::Free { next: list.head };
        list.head = Some(index);
        list.count += 1;
    }

    /// Allocates one page, preferring `cpu`'s own free list.
    ///
    /// # Errors
    ///
    /// Returns [`PmmError::OutOfMemory`] if every CPU's free list is empty.
    pub fn alloc_page(&self, cpu: usize) -> Result<PhysAddr, PmmError> {
        let idx = self.pop_free(cpu).ok_or(PmmError::OutOfMemory)?;
        self.entries[idx as usize].state = PageState::Standalone;
        self.free_count.fetch_sub(1, Ordering::Relaxed);
        Ok(self.frame_addr(idx as usize))
    }

    /// Returns `phys` to `cpu`'s free list.
    ///
    /// # Errors
    ///
    /// Returns [`PmmError::BadPfnHeader`] — a category-2 invariant
    /// violation the caller must escalate to `fatal_error` — if `phys` is
    /// not currently a standalone used page (already free, or part of a
    /// pool/contig span that must be freed through that span's own API).
    pub fn free_page(&self, cpu: usize, phys: PhysAddr) -> Result<(), PmmError> {
        let idx = self.frame_index(phys);
        if !matches!(self.entries[idx].state, PageState::Standalone) {
            return Err(PmmError::BadPfnHeader { addr: phys });
        }
        self.push_free(cpu, idx as u32);
        self.free_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates `count` contiguous pages aligned to `align_pages`, tagging
    /// the first `contig-base` and the rest `contig-item`.
    ///
    /// This is a cold path: it scans the database linearly rather than
    /// consulting the free lists' (unordered) link structure, then removes
    /// every consumed frame from whichever per-CPU list currently holds it.
    ///
    /// # Errors
    ///
    /// Returns [`PmmError::NoContiguousRun`] if no run of that shape exists.
    pub fn alloc_contig(
        &self,
        tag: Tag,
        count: u64,
        align_pages: u64,
    ) -> Result<PhysAddr, PmmError> {
        let align = align_pages.max(1);
        let mut start = 0usize;
        'search: while start + count as usize <= self.entries.len() {
            if (self.base_page + start as u64) % align != 0 {
                start += 1;
                continue;
            }
            for i in 0..count as usize {
                if !self.entries[start + i].is_free() {
                    start += i + 1;
                    continue 'search;
                }
            }
            break;
        }
        if start + count as usize > self.entries.len() {
            return Err(PmmError::NoContiguousRun);
        }

        let consumed: aurora_noalloc::vec::ArrayVec<u32, 4096> = {
            let mut v = aurora_noalloc::vec::ArrayVec::new();
            for i in 0..count as usize {
                let _ = v.try_push((start + i) as u32);
            }
            v
        };
        for list in &self.free_lists {
            let mut guard = list.lock();
            let mut head = guard.head;
            let mut new_head = None;
            let mut new_count = 0usize;
            // Rebuild the list, dropping any index present in `consumed`.
            let mut kept: aurora_noalloc::vec::ArrayVec<u32, 65536> =
                aurora_noalloc::vec::ArrayVec::new();
            while let Some(idx) = head {
                let next = match self.entries[idx as usize].state {
                    PageState::Free { next } => next,
                    _ => unreachable!(),
                };
                if !consumed.as_slice().contains(&idx) {
                    let _ = kept.try_push(idx);
                }
                head = next;
            }
            for &idx in kept.as_slice().iter().rev() {
                self.entries[idx as usize].state = PageState::Free { next: new_head };
                new_head = Some(idx);
                new_count += 1;
            }
            guard.head = new_head;
            guard.count = new_count;
        }

        self.entries[start].state = PageState::ContigBase {
            tag,
            page_count: count,
        };
        for i in 1..count as usize {
            self.entries[start + i].state = PageState::ContigItem;
        }
        self.free_count.fetch_sub(count as usize, Ordering::Relaxed);
        Ok(self.frame_addr(start))
    }

    /// Frees a contiguous run previously returned by `alloc_contig`, walking
    /// the recorded length and returning each page to `cpu`'s free list.
    ///
    /// # Errors
    ///
    /// Returns [`PmmError::BadPfnHeader`] if `phys` is not the base of a
    /// contiguous span.
    pub fn free_contig(&self, cpu: usize, phys: PhysAddr) -> Result<(), PmmError> {
        let idx = self.frame_index(phys);
        let count = match self.entries[idx].state {
            PageState::ContigBase { page_count, .. } => page_count,
            _ => return Err(PmmError::BadPfnHeader { addr: phys }),
        };
        for i in 0..count as usize {
            self.push_free(cpu, (idx + i) as u32);
        }
        self.free_count.fetch_add(count as usize, Ordering::Relaxed);
        Ok(())
    }

    /// Marks a single page as the base of a pool span (see `pool.rs`),
    /// recording `tag` and the span's page count.
    pub(crate) fn mark_pool_base(&self, phys: PhysAddr, tag: Tag, page_count: u32) {
        let idx = self.frame_index(phys);
        self.entries[idx].state = PageState::PoolBase { tag, page_count };
    }

    /// Marks a page as a non-first page of a pool span.
    pub(crate) fn mark_pool_item(&self, phys: PhysAddr) {
        let idx = self.frame_index(phys);
        self.entries[idx].state = PageState::PoolItem;
    }

    /// Total free pages across every CPU's list.
    pub fn free_pages(&self) -> usize {
        self.free_count.load(Ordering::Relaxed)
    }

    /// Total pages tracked by the database.
    pub fn total_pages(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db(frame_count: usize, num_cpus: usize) -> (Vec<u8>, PageFrameDatabase) {
        let mut storage = vec![0u8; frame_count * core::mem::size_of::<PageEntry>()];
        let ranges = [MemoryRange {
            base_page: 0,
            page_count: frame_count as u64,
            usable: true,
        }];
        let storage_static: &'static mut [u8] =
            unsafe { core::slice::from_raw_parts_mut(storage.as_mut_ptr(), storage.len()) };
        let db =
            unsafe { PageFrameDatabase::init(storage_static, 0, frame_count, num_cpus, &ranges) };
        (storage, db)
    }

    #[test]
    fn alloc_exhausts_then_reports_out_of_memory() {
        let (_storage, db) = make_db(4, 1);
        assert_eq!(db.free_pages(), 4);
        for _ in 0..4 {
            assert!(db.alloc_page(0).is_ok());
        }
        assert_eq!(db.alloc_page(0), Err(PmmError::OutOfMemory));
    }

    #[test]
    fn free_then_alloc_returns_lifo_order_per_cpu() {
        let (_storage, db) = make_db(4, 1);
        let a = db.alloc_page(0).unwrap();
        let b = db.alloc_page(0).unwrap();
        db.free_page(0, a).unwrap();
        db.free_page(0, b).unwrap();
        // LIFO: the most recently freed page (`b`) comes back first.
        assert_eq!(db.alloc_page(0).unwrap(), b);
        assert_eq!(db.alloc_page(0).unwrap(), a);
    }

    #[test]
    fn free_of_already_free_page_is_bad_pfn_header() {
        let (_storage, db) = make_db(2, 1);
        let a = db.alloc_page(0).unwrap();
        db.free_page(0, a).unwrap();
        assert_eq!(db.free_page(0, a), Err(PmmError::BadPfnHeader { addr: a }));
    }

    #[test]
    fn alloc_steals_from_sibling_when_local_list_empty() {
        let (_storage, db) = make_db(4, 2);
        // All 4 pages are distributed round-robin across 2 CPUs (2 each).
        // Exhaust CPU 0's own share, then it must steal from CPU 1.
        let _ = db.alloc_page(0).unwrap();
        let _ = db.alloc_page(0).unwrap();
        assert!(db.alloc_page(0).is_ok());
    }

    #[test]
    fn contig_alloc_returns_aligned_run_and_frees_as_unit() {
        let (_storage, db) = make_db(16, 1);
        let tag = Tag::new(*b"Cntg");
        let base = db.alloc_contig(tag, 4, 1).unwrap();
        assert_eq!(db.free_pages(), 12);
        db.free_contig(0, base).unwrap();
        assert_eq!(db.free_pages(), 16);
    }

    #[test]
    fn used_xor_free_invariant_holds_after_churn() {
        let (_storage, db) = make_db(8, 1);
        let mut held = vec![];
        for _ in 0..5 {
            held.push(db.alloc_page(0).unwrap());
        }
        assert_eq!(db.free_pages(), 3);
        for p in held.drain(..) {
            db.free_page(0, p).unwrap();
        }
        assert_eq!(db.free_pages(), 8);
    }
}
