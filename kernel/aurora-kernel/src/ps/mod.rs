//! PS: threads and the per-CPU scheduler (spec §4.7, §2 layer L6).
//!
//! The ready queue, wait tree, and termination queue are each a thin
//! wrapper around the shared intrusive [`aurora_core::list::List`]; this
//! module's own contribution is `scheduler`'s dispatch algorithm and the
//! cross-CPU wake/terminate/reap primitives [`crate::ev`] builds on.

pub mod ready_queue;
pub mod scheduler;
pub mod thread;
pub mod wait;
