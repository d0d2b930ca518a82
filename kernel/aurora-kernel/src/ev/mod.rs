//! EV: wait primitives (spec §4.8, §2 layer L6).
//!
//! Each waitable kind — [`signal::Signal`], [`mutex::Mutex`],
//! [`timer::Timer`] — embeds a [`dispatcher::DispatcherHeader`] (or, for
//! `Mutex`, an equivalent concrete wait-list/lock pair) and implements its
//! own wait/wake entry points rather than going through one generic
//! `wait_for_object`/`set_signal` pair: spec §4.8 already spells out a
//! different already-signalled rule and a different wake effect for each
//! kind (plain wake for a signal, ownership transfer for a mutex, sticky
//! expiry for a timer), so a shared generic path would need the same
//! per-kind branch internally anyway.

pub mod dispatcher;
pub mod mutex;
pub mod signal;
pub mod timer;

pub use dispatcher::{DispatcherHeader, WaitResult};
pub use mutex::Mutex;
pub use signal::Signal;
pub use timer::Timer;
