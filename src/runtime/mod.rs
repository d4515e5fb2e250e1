//! Per-thread execution: event loops, threads, and the context handed to calls.
//!
//! Every runtime thread owns exactly one [`EventLoop`]. Work reaches a thread only
//! as a [`QueuedCall`] posted through its [`LoopHandle`], and executes with a
//! [`Context`] naming that thread.

pub mod context;
pub mod event_loop;
pub mod thread;

pub use context::Context;
pub use event_loop::{CallBody, CallFailure, EventLoop, LoopHandle, QueuedCall, RunStats};
pub use thread::{Thread, ThreadState};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a panicking call poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
