//! Tagged, size-classed kernel pool allocator (spec §4.5).
//!
//! Serves sub-page and small multi-page allocations from per-CPU free lists
//! organized by size class. Every block carries a [`Tag`]; `free` takes the
//! tag back and panics-via-`Err` (escalated by `aurora-kernel` to
//! `fatal_error(BadPoolHeader)`) if it doesn't match what `alloc` stamped.
//! Per-tag live/peak count and byte statistics are kept for diagnostics.

use core::sync::atomic::{AtomicUsize, Ordering};

use aurora_core::addr::PhysAddr;
use aurora_core::cpu_local::MAX_CPUS;
use aurora_core::id::Tag;
use aurora_core::sync::SpinLock;
use aurora_noalloc::vec::ArrayVec;

use crate::pfdb::{PageFrameDatabase, PmmError};

const PAGE_SIZE: u64 = 4096;

/// Size classes served by the pool, smallest to largest. Any request larger
/// than the final entry must instead go through
/// [`PageFrameDatabase::alloc_contig`] directly.
const SIZE_CLASSES: [usize; 8] = [16, 32, 64, 128, 256, 512, 1024, 2048];

/// Maximum distinct tags tracked for diagnostics at once.
const MAX_TRACKED_TAGS: usize = 256;

/// Block header prefixed to every pool allocation. `size` records which
/// size class it was carved from so `free` can return it to the right
/// free list without the caller repeating it.
#[repr(C)]
struct BlockHeader {
    tag: Tag,
    size_class: u32,
}

const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

/// Errors the pool allocator can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The request exceeds the largest size class the pool serves.
    RequestTooLarge,
    /// The underlying physical frame database could not supply a page to
    /// back a new size-class span.
    BackingAllocationFailed(PmmError),
    /// `free` was called with a tag that does not match the tag stamped at
    /// allocation time — a category-2 invariant violation (spec §7) the
    /// caller must escalate to `fatal_error(BadPoolHeader)`.
    TagMismatch {
        /// Tag recorded when the block was allocated.
        allocated_with: Tag,
        /// Tag presented to `free`.
        freed_with: Tag,
    },
}

#[derive(Clone, Copy)]
struct FreeNode {
    next: Option<*mut FreeNode>,
}

struct ClassFreeList {
    head: Option<*mut FreeNode>,
}

impl Default for ClassFreeList {
    fn default() -> Self {
        Self { head: None }
    }
}

/// Live/peak accounting for a single pool tag, for leak diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagStats {
    /// Tag these statistics belong to.
    pub tag: Option<Tag>,
    /// Blocks currently outstanding under this tag.
    pub live_count: u64,
    /// Bytes currently outstanding under this tag (size-class granularity).
    pub live_bytes: u64,
    /// Largest `live_count` ever observed.
    pub peak_count: u64,
    /// Largest `live_bytes` ever observed.
    pub peak_bytes: u64,
}

/// The tagged, size-classed kernel pool allocator.
///
/// `free_lists[cpu][class]` is a singly linked list of free blocks of that
/// size class local to that CPU; there is no cross-CPU steal for the pool
/// (unlike the frame database) since pool spans are reclaimed a page at a
/// time back to the PMM when a CPU's class list runs dry, rather than
/// shared directly.
pub struct Pool<'a> {
    pmm: &'a PageFrameDatabase,
    free_lists: [[SpinLock<ClassFreeList>; SIZE_CLASSES.len()]; MAX_CPUS],
    stats: SpinLock<ArrayVec<TagStats, MAX_TRACKED_TAGS>>,
}

// SAFETY: every free-list node is only ever reachable through the owning
// CPU's `SpinLock`, which this type requires the caller to route all access
// through; raw pointers inside `FreeNode`/`ClassFreeList` point at pool
// storage that outlives the allocator (spec §9: "tear-down is not
// supported").
unsafe impl Send for Pool<'_> {}
unsafe impl Sync for Pool<'_> {}

impl<'a> Pool<'a> {
    /// Creates a new pool over `pmm`, with empty free lists for every CPU.
    pub fn new(pmm: &'a PageFrameDatabase) -> Self {
        Self {
            pmm,
            free_lists: core::array::from_fn(|_| core::array::from_fn(|_| SpinLock::new(ClassFreeList::default()))),
            stats: SpinLock::new(ArrayVec::new()),
        }
    }

    fn size_class_for(size: usize) -> Option<usize> {
        SIZE_CLASSES.iter().position(|&c| size + HEADER_SIZE <= c)
    }

    fn record_alloc(&self, tag: Tag, bytes: u64) {
        let mut stats = self.stats.lock();
        if let Some(entry) = stats.as_mut_slice().iter_mut().find(|s| s.tag == Some(tag)) {
            entry.live_count += 1;
            entry.live_bytes += bytes;
            entry.peak_count = entry.peak_count.max(entry.live_count);
            entry.peak_bytes = entry.peak_bytes.max(entry.live_bytes);
        } else {
            let _ = stats.try_push(TagStats {
                tag: Some(tag),
                live_count: 1,
                live_bytes: bytes,
                peak_count: 1,
                peak_bytes: bytes,
            });
        }
    }

    fn record_free(&self, tag: Tag, bytes: u64) {
        let mut stats = self.stats.lock();
        if let Some(entry) = stats.as_mut_slice().iter_mut().find(|s| s.tag == Some(tag)) {
            entry.live_count = entry.live_count.saturating_sub(1);
            entry.live_bytes = entry.live_bytes.saturating_sub(bytes);
        }
    }

    /// Returns a snapshot of the live/peak statistics recorded for `tag`, if
    /// any allocation under that tag has ever been observed.
    pub fn stats_for(&self, tag: Tag) -> Option<TagStats> {
        self.stats
            .lock()
            .as_slice()
            .iter()
            .find(|s| s.tag == Some(tag))
            .copied()
    }

    /// Allocates at least `size` bytes, tagged with `tag`, on behalf of
    /// `cpu`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::RequestTooLarge`] if `size` exceeds the largest
    /// size class, or [`PoolError::BackingAllocationFailed`] if the free
    /// list for that class was empty on every CPU and a new page could not
    /// be carved from the frame database.
    pub fn alloc(&self, cpu: usize, tag: Tag, size: usize) -> Result<*mut u8, PoolError> {
        let class_idx = Self::size_class_for(size).ok_or(PoolError::RequestTooLarge)?;
        let class_size = SIZE_CLASSES[class_idx];

        let block = {
            let mut list = self.free_lists[cpu][class_idx].lock();
            if let Some(node) = list.head {
                // SAFETY: every node on this list was written by `refill`
                // or returned by a prior `free`, both of which leave a
                // valid `FreeNode` at this address until it is popped here.
                let next = unsafe { (*node).next };
                list.head = next;
                Some(node.cast::<u8>())
            } else {
                None
            }
        };

        let block = match block {
            Some(b) => b,
            None => {
                self.refill(cpu, class_idx, tag)
                    .map_err(PoolError::BackingAllocationFailed)?;
                let mut list = self.free_lists[cpu][class_idx].lock();
                let node = list.head.expect("refill must add at least one free block");
                // SAFETY: see above.
                let next = unsafe { (*node).next };
                list.head = next;
                node.cast::<u8>()
            }
        };

        // SAFETY: `block` points at `class_size` bytes of pool storage this
        // allocator owns exclusively after popping it from the free list.
        unsafe {
            let header = block.cast::<BlockHeader>();
            header.write(BlockHeader {
                tag,
                size_class: class_idx as u32,
            });
        }
        self.record_alloc(tag, class_size as u64);
        // SAFETY: the body begins immediately after the header within the
        // same allocation.
        Ok(unsafe { block.add(HEADER_SIZE) })
    }

    /// Carves one fresh page from the frame database into blocks of
    /// `class_idx`'s size, threading them onto `cpu`'s free list.
    fn refill(&self, cpu: usize, class_idx: usize, tag: Tag) -> Result<(), PmmError> {
        let phys = self.pmm.alloc_page(cpu)?;
        self.pmm.mark_pool_base(phys, tag, 1);
        let class_size = SIZE_CLASSES[class_idx];
        let blocks_per_page = (PAGE_SIZE as usize) / class_size;

        // SAFETY: `phys` was just allocated exclusively from the PMM and is
        // being treated as an identity-mapped kernel page, matching the
        // convention `aurora-kernel`'s VMM establishes for all pool spans.
        let base = phys.as_u64() as *mut u8;
        let mut list = self.free_lists[cpu][class_idx].lock();
        for i in (0..blocks_per_page).rev() {
            // SAFETY: each `i` indexes a disjoint `class_size`-byte slot
            // within the page just allocated.
            unsafe {
                let node_ptr = base.add(i * class_size).cast::<FreeNode>();
                node_ptr.write(FreeNode { next: list.head });
                list.head = Some(node_ptr);
            }
        }
        Ok(())
    }

    /// Frees a block previously returned by [`Pool::alloc`].
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::TagMismatch`] — a category-2 invariant
    /// violation the caller must escalate to
    /// `fatal_error(BadPoolHeader)` — if `tag` does not match the tag
    /// stamped at allocation time.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by a prior call to `alloc` on this
    /// pool and not already freed.
    pub unsafe fn free(&self, cpu: usize, ptr: *mut u8, tag: Tag) -> Result<(), PoolError> {
        // SAFETY: `ptr` was returned by `alloc`, which places the body
        // immediately after a `BlockHeader`.
        let header_ptr = unsafe { ptr.sub(HEADER_SIZE) }.cast::<BlockHeader>();
        // SAFETY: `header_ptr` points at a `BlockHeader` written by `alloc`
        // and not yet freed, per this function's safety contract.
        let header = unsafe { header_ptr.read() };
        if header.tag != tag {
            return Err(PoolError::TagMismatch {
                allocated_with: header.tag,
                freed_with: tag,
            });
        }

        let class_idx = header.size_class as usize;
        let class_size = SIZE_CLASSES[class_idx];
        self.record_free(tag, class_size as u64);

        let mut list = self.free_lists[cpu][class_idx].lock();
        // SAFETY: `header_ptr` is the start of the block, sized for this
        // class, and is being relinked onto the free list it was carved
        // from.
        unsafe {
            let node_ptr = header_ptr.cast::<FreeNode>();
            node_ptr.write(FreeNode { next: list.head });
            list.head = Some(node_ptr);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pmm(frame_count: usize) -> (Vec<u8>, PageFrameDatabase) {
        use crate::pfdb::MemoryRange;
        let mut storage = vec![0u8; frame_count * 32];
        let ranges = [MemoryRange {
            base_page: 0,
            page_count: frame_count as u64,
            usable: true,
        }];
        let storage_static: &'static mut [u8] =
            unsafe { core::slice::from_raw_parts_mut(storage.as_mut_ptr(), storage.len()) };
        let db = unsafe { PageFrameDatabase::init(storage_static, 0, frame_count, 1, &ranges) };
        (storage, db)
    }

    #[test]
    fn alloc_then_free_round_trips() {
        let (_s, pmm) = make_pmm(4);
        let pool = Pool::new(&pmm);
        let tag = Tag::new(*b"Test");
        let ptr = pool.alloc(0, tag, 24).unwrap();
        assert!(pool.stats_for(tag).unwrap().live_count == 1);
        unsafe {
            pool.free(0, ptr, tag).unwrap();
        }
        assert_eq!(pool.stats_for(tag).unwrap().live_count, 0);
    }

    #[test]
    fn free_with_wrong_tag_reports_mismatch() {
        let (_s, pmm) = make_pmm(4);
        let pool = Pool::new(&pmm);
        let good = Tag::new(*b"ABCD");
        let bad = Tag::new(*b"XYZZ");
        let ptr = pool.alloc(0, good, 24).unwrap();
        let err = unsafe { pool.free(0, ptr, bad) }.unwrap_err();
        assert_eq!(
            err,
            PoolError::TagMismatch {
                allocated_with: good,
                freed_with: bad,
            }
        );
    }

    #[test]
    fn request_larger_than_largest_class_is_rejected() {
        let (_s, pmm) = make_pmm(4);
        let pool = Pool::new(&pmm);
        let tag = Tag::new(*b"Big!");
        assert_eq!(pool.alloc(0, tag, 1 << 20), Err(PoolError::RequestTooLarge));
    }

    #[test]
    fn stats_track_peak_independent_of_live() {
        let (_s, pmm) = make_pmm(4);
        let pool = Pool::new(&pmm);
        let tag = Tag::new(*b"Peak");
        let a = pool.alloc(0, tag, 16).unwrap();
        let b = pool.alloc(0, tag, 16).unwrap();
        unsafe { pool.free(0, a, tag).unwrap() };
        let stats = pool.stats_for(tag).unwrap();
        assert_eq!(stats.live_count, 1);
        assert_eq!(stats.peak_count, 2);
        unsafe { pool.free(0, b, tag).unwrap() };
    }

    #[test]
    fn refill_serves_many_small_allocations_from_one_page() {
        let (_s, pmm) = make_pmm(4);
        let pool = Pool::new(&pmm);
        let tag = Tag::new(*b"Many");
        let mut ptrs = ArrayVec::<*mut u8, 64>::new();
        for _ in 0..50 {
            ptrs.push(pool.alloc(0, tag, 16).unwrap());
        }
        for p in ptrs.as_slice() {
            unsafe { pool.free(0, *p, tag).unwrap() };
        }
    }
}
