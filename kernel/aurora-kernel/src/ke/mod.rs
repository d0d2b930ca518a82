//! KE: scheduling glue (spec §4.9, §2 layer L7).
//!
//! Everything the scheduler needs that is not itself a thread: the
//! per-CPU deferred-procedure-call queue, its kernel-signal cousin,
//! inter-processor routine broadcast, and the panic path every other
//! subsystem's invariant violations funnel into.

pub mod dpc;
pub mod ipi;
pub mod ksignal;
pub mod panic;
