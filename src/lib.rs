//! Mellor-Crummey and Scott (MCS) queue locks.
//!
//! Every acquisition enqueues its own node behind the current tail and waits
//! on a flag inside that node, so waiters never contend on a shared word and
//! the lock is granted strictly in arrival order. On release the holder wakes
//! only its direct successor.
//!
//! How a waiter passes the time is decided by an [`Environment`]: [`Park`]
//! (the default) blocks the thread, [`Spin`] and [`Yield`] poll.
//!
//! [`RawMcsLock`] exposes the bare `acquire`/`release` protocol; [`McsLock`]
//! wraps it around owned data with an RAII guard and poisoning.

mod environment;
mod mcs_lock;
mod poison;
mod raw_mcs_lock;

pub use environment::{Environment, Park, Spin, Yield};
pub use mcs_lock::{McsLock, McsLockGuard};
pub use raw_mcs_lock::{Handle, RawMcsLock};
