//! Kernel object manager (spec §3 "Kernel object", §8).
//!
//! Every OB-managed object begins with an opaque [`ObjectHeader`]: a
//! pointer to its [`TypeDescriptor`], an atomic reference count, and a
//! 4-byte [`Tag`] stamped at creation for leak attribution. Callers only
//! ever see a pointer to the body that follows the header — [`create`]
//! hands one out with a reference count of one, [`reference`] and
//! [`dereference`] each re-check the tag the caller presents against the
//! one stamped at creation. A mismatch is always a programmer bug (spec
//! §7 category 2) and escalates straight to `fatal_error(BadObjectHeader)`
//! rather than returning an error the caller could ignore.
//!
//! Storage is carved from `aurora_mm::pool::Pool`, the same tagged
//! size-classed allocator `aurora-mm` already exposes; this module adds
//! the header/refcount/destructor discipline on top, the way `ev` and `ps`
//! need it for dispatcher objects and threads.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use aurora_core::id::Tag;
use aurora_core::panic_code::PanicCode;
use aurora_mm::pool::{Pool, PoolError};

use crate::ke::panic::fatal_error;

/// Static description of an object type: its name, body size, and an
/// optional destructor. `body_size` is the size of the caller's body type,
/// not counting [`ObjectHeader`] — [`create`] adds the header itself.
pub struct TypeDescriptor {
    /// Human-readable type name, used only for diagnostics.
    pub name: &'static str,
    /// Size in bytes of the body following the header.
    pub body_size: usize,
    /// Runs exactly once, immediately before the object's storage is
    /// returned to the pool, when the reference count reaches zero.
    pub destructor: Option<fn(*mut ())>,
}

#[repr(C)]
struct ObjectHeader {
    type_desc: &'static TypeDescriptor,
    refcount: AtomicU32,
    tag: Tag,
}

const HEADER_SIZE: usize = core::mem::size_of::<ObjectHeader>();

/// Errors [`create`]/[`dereference`] can report without escalating —
/// pool exhaustion is recoverable by the caller (retry, report
/// `out-of-memory`), unlike a tag mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObError {
    /// The pool could not back this allocation or could not take the
    /// freed block back (the latter only on an internal bug, since `tag`
    /// is rechecked against the stored tag before this ever reaches the
    /// pool).
    Pool(PoolError),
}

fn tag_as_u64(tag: Tag) -> u64 {
    u64::from(u32::from_be_bytes(tag.as_bytes()))
}

/// Allocates a new object of `desc`'s type through `pool`, stamps it with
/// `tag`, and returns its body pointer with a reference count of one.
///
/// # Safety
///
/// `desc.body_size` must equal the size of the type the caller will treat
/// the returned pointer as, and that type must tolerate being left
/// uninitialized until the caller writes its fields (`create` does not
/// initialize the body, only the header).
///
/// # Errors
///
/// Returns [`ObError::Pool`] if the pool cannot back the allocation.
pub unsafe fn create(
    pool: &Pool<'_>,
    cpu: usize,
    desc: &'static TypeDescriptor,
    tag: Tag,
) -> Result<NonNull<u8>, ObError> {
    let total = HEADER_SIZE + desc.body_size;
    let raw = pool.alloc(cpu, tag, total).map_err(ObError::Pool)?;
    // SAFETY: `raw` is a fresh allocation at least `total` bytes long,
    // exclusively owned by this call.
    unsafe {
        raw.cast::<ObjectHeader>().write(ObjectHeader {
            type_desc: desc,
            refcount: AtomicU32::new(1),
            tag,
        });
    }
    // SAFETY: the body begins immediately after the header within the
    // same allocation.
    let body = unsafe { raw.add(HEADER_SIZE) };
    Ok(unsafe { NonNull::new_unchecked(body) })
}

/// # Safety
///
/// `body` must have been returned by [`create`] and the header it precedes
/// must not have been freed.
unsafe fn header_of(body: NonNull<u8>) -> NonNull<ObjectHeader> {
    // SAFETY: `create` always places the body exactly `HEADER_SIZE` bytes
    // after the header within the same allocation.
    unsafe { NonNull::new_unchecked(body.as_ptr().sub(HEADER_SIZE).cast()) }
}

fn check_tag(header: NonNull<ObjectHeader>, presented: Tag) -> Tag {
    // SAFETY: caller of the two public functions below guarantees `header`
    // is live.
    let stored = unsafe { (*header.as_ptr()).tag };
    if stored != presented {
        fatal_error(
            PanicCode::BadObjectHeader,
            tag_as_u64(stored),
            tag_as_u64(presented),
            header.as_ptr() as u64,
            0,
        );
    }
    stored
}

/// Checks `tag` against the tag stamped at creation and increments the
/// reference count.
///
/// # Safety
///
/// `body` must have been returned by [`create`] and not yet reached a
/// fully dereferenced (freed) state.
///
/// # Panics
///
/// Escalates to `fatal_error(BadObjectHeader)` if `tag` does not match the
/// tag stamped at creation.
pub unsafe fn reference(body: NonNull<u8>, tag: Tag) {
    let header = unsafe { header_of(body) };
    check_tag(header, tag);
    // SAFETY: header is live; `AtomicU32` requires no exclusivity.
    unsafe { (*header.as_ptr()).refcount.fetch_add(1, Ordering::AcqRel) };
}

/// Checks `tag`, decrements the reference count, and — if it reaches zero
/// — runs the type's destructor (if any) and returns the block to `pool`.
///
/// # Safety
///
/// `body` must have been returned by [`create`] or survived a prior
/// [`reference`]; it must not be touched again if this call drops the
/// count to zero.
///
/// # Errors
///
/// Returns [`ObError::Pool`] if the final free could not be returned to
/// the pool.
///
/// # Panics
///
/// Escalates to `fatal_error(BadObjectHeader)` if `tag` does not match the
/// tag stamped at creation.
pub unsafe fn dereference(
    pool: &Pool<'_>,
    cpu: usize,
    body: NonNull<u8>,
    tag: Tag,
) -> Result<(), ObError> {
    let header = unsafe { header_of(body) };
    check_tag(header, tag);
    // SAFETY: header is live.
    let prev = unsafe { (*header.as_ptr()).refcount.fetch_sub(1, Ordering::AcqRel) };
    if prev == 1 {
        // SAFETY: header is live and this is the last reference; no other
        // caller can observe the body again after this branch runs.
        let desc = unsafe { (*header.as_ptr()).type_desc };
        if let Some(destructor) = desc.destructor {
            destructor(body.as_ptr().cast());
        }
        // SAFETY: the header/body pair was allocated by `pool.alloc` and
        // this is the one and only free of it.
        unsafe {
            pool.free(cpu, header.as_ptr().cast(), tag)
                .map_err(ObError::Pool)?;
        }
    }
    Ok(())
}

/// Returns the tag stamped on `body` at creation.
///
/// # Safety
///
/// `body` must have been returned by [`create`] and not yet freed.
#[must_use]
pub unsafe fn tag_of(body: NonNull<u8>) -> Tag {
    let header = unsafe { header_of(body) };
    unsafe { (*header.as_ptr()).tag }
}

/// Returns the current reference count of `body`. For diagnostics and
/// tests only; racy against concurrent `reference`/`dereference` calls.
///
/// # Safety
///
/// `body` must have been returned by [`create`] and not yet freed.
#[must_use]
pub unsafe fn refcount(body: NonNull<u8>) -> u32 {
    let header = unsafe { header_of(body) };
    unsafe { (*header.as_ptr()).refcount.load(Ordering::Acquire) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_mm::pfdb::{MemoryRange, PageFrameDatabase};
    use core::sync::atomic::AtomicUsize;

    fn make_pmm(frame_count: usize) -> (Vec<u8>, PageFrameDatabase) {
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

    static TEST_TYPE: TypeDescriptor = TypeDescriptor {
        name: "TestObj",
        body_size: core::mem::size_of::<u64>(),
        destructor: None,
    };

    static DESTRUCTOR_RUNS: AtomicUsize = AtomicUsize::new(0);

    fn count_destructor(_ctx: *mut ()) {
        DESTRUCTOR_RUNS.fetch_add(1, Ordering::Relaxed);
    }

    static DESTRUCTIBLE_TYPE: TypeDescriptor = TypeDescriptor {
        name: "Destructible",
        body_size: core::mem::size_of::<u64>(),
        destructor: Some(count_destructor),
    };

    #[test]
    fn create_starts_with_refcount_one() {
        let (_s, pmm) = make_pmm(4);
        let pool = Pool::new(&pmm);
        let tag = Tag::new(*b"Obj1");
        let body = unsafe { create(&pool, 0, &TEST_TYPE, tag).unwrap() };
        assert_eq!(unsafe { refcount(body) }, 1);
        assert_eq!(unsafe { tag_of(body) }, tag);
        unsafe { dereference(&pool, 0, body, tag).unwrap() };
    }

    #[test]
    fn reference_increments_and_dereference_decrements() {
        let (_s, pmm) = make_pmm(4);
        let pool = Pool::new(&pmm);
        let tag = Tag::new(*b"Obj2");
        let body = unsafe { create(&pool, 0, &TEST_TYPE, tag).unwrap() };
        unsafe { reference(body, tag) };
        assert_eq!(unsafe { refcount(body) }, 2);
        unsafe { dereference(&pool, 0, body, tag).unwrap() };
        assert_eq!(unsafe { refcount(body) }, 1);
        unsafe { dereference(&pool, 0, body, tag).unwrap() };
    }

    #[test]
    fn destructor_runs_exactly_once_at_zero() {
        let (_s, pmm) = make_pmm(4);
        let pool = Pool::new(&pmm);
        let tag = Tag::new(*b"Dtor");
        let before = DESTRUCTOR_RUNS.load(Ordering::Relaxed);
        let body = unsafe { create(&pool, 0, &DESTRUCTIBLE_TYPE, tag).unwrap() };
        unsafe { reference(body, tag) };
        unsafe { dereference(&pool, 0, body, tag).unwrap() };
        assert_eq!(DESTRUCTOR_RUNS.load(Ordering::Relaxed), before);
        unsafe { dereference(&pool, 0, body, tag).unwrap() };
        assert_eq!(DESTRUCTOR_RUNS.load(Ordering::Relaxed), before + 1);
    }

    #[test]
    #[should_panic(expected = "bad-object-header")]
    fn dereference_with_wrong_tag_is_fatal() {
        let (_s, pmm) = make_pmm(4);
        let pool = Pool::new(&pmm);
        let tag = Tag::new(*b"Good");
        let wrong = Tag::new(*b"Evil");
        let body = unsafe { create(&pool, 0, &TEST_TYPE, tag).unwrap() };
        unsafe { dereference(&pool, 0, body, wrong).unwrap() };
    }

    #[test]
    #[should_panic(expected = "bad-object-header")]
    fn reference_with_wrong_tag_is_fatal() {
        let (_s, pmm) = make_pmm(4);
        let pool = Pool::new(&pmm);
        let tag = Tag::new(*b"Good");
        let wrong = Tag::new(*b"Evil");
        let body = unsafe { create(&pool, 0, &TEST_TYPE, tag).unwrap() };
        unsafe { reference(body, wrong) };
    }
}
