//! Fixed-capacity collections for code that cannot rely on an allocator.
//!
//! The pool allocator (`aurora-mm::pool`) isn't available before MM bring-up
//! completes, and dynamic allocation above `DISPATCH` IRQL is forbidden
//! outright (spec §5). Several subsystems still need small, bounded
//! collections before or above that point — the early boot-time memory
//! descriptor snapshot, the per-CPU DPC/kernel-signal drain queues, the
//! early serial log ring. [`vec::ArrayVec`] and [`ringbuf::RingBuf`] cover
//! those cases with a compile-time capacity and no heap dependency at all.

#![no_std]
#![warn(missing_docs)]

pub mod ringbuf;
pub mod vec;
