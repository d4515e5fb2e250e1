//! Error types for Tether
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::id::{ObjectId, ThreadId};

/// All error types that can occur in the dispatch runtime
#[derive(Debug, Error)]
pub enum TetherError {
    /// Object state touched outside a resolved call on its affinity thread
    #[error("Affinity violation: {object} has affinity {affinity} but was reached from {caller}")]
    AffinityViolation {
        object: ObjectId,
        caller: ThreadId,
        affinity: ThreadId,
    },

    /// Thread was already started (or already finished)
    #[error("Thread already started: {0}")]
    DoubleStart(ThreadId),

    /// Affinity change refused while queued calls target the object
    #[error("Cannot move {object}: {pending} call(s) in flight")]
    CallsInFlight { object: ObjectId, pending: usize },

    /// Object is the execution unit of its own thread and cannot move
    #[error("Cannot move {0}: it is the running unit of its thread")]
    ThreadUnit(ObjectId),

    /// Synchronous call on an object that is already executing a call
    #[error("Re-entrant call on busy object: {0}")]
    Reentrant(ObjectId),

    /// Object has been disposed
    #[error("Object disposed: {0}")]
    Disposed(ObjectId),

    /// The target thread's event loop has exited
    #[error("Event loop closed: {0}")]
    LoopClosed(ThreadId),

    /// A thread tried to wait on itself
    #[error("Thread cannot wait on itself: {0}")]
    SelfJoin(ThreadId),

    /// Waiting for a thread to finish exceeded the deadline
    #[error("Timed out waiting for thread: {0}")]
    JoinTimeout(ThreadId),

    /// Thread disposal requested before the thread finished
    #[error("Thread still running: {0}")]
    ThreadRunning(ThreadId),

    /// IO error (OS thread spawn)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tether operations
pub type Result<T> = std::result::Result<T, TetherError>;
