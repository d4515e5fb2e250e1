//! Execution context
//!
//! The context is how a call learns which thread it is running on. It is passed
//! explicitly to every call body and every dispatching operation; there is no
//! ambient "current thread" lookup.

use std::fmt;

use crate::error::{Result, TetherError};
use crate::id::ThreadId;
use crate::runtime::event_loop::{CallBody, LoopHandle};

/// The thread a piece of code is executing on, plus a handle to that thread's queue
#[derive(Clone)]
pub struct Context {
    thread: ThreadId,
    handle: Option<LoopHandle>,
}

impl Context {
    /// Context for code running on the thread that owns `handle`
    pub(crate) fn on_loop(handle: LoopHandle) -> Self {
        Self {
            thread: handle.thread(),
            handle: Some(handle),
        }
    }

    /// Context for a thread that runs no event loop.
    ///
    /// Its id never matches an affinity, so every call made with it is queued.
    pub fn foreign() -> Self {
        Self {
            thread: ThreadId::FOREIGN,
            handle: None,
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn handle(&self) -> Option<&LoopHandle> {
        self.handle.as_ref()
    }

    pub fn is_foreign(&self) -> bool {
        self.thread.is_foreign()
    }

    /// Append a call to this thread's own queue, behind everything already queued
    pub fn defer<F>(&self, body: F) -> Result<u64>
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        let handle = self
            .handle
            .as_ref()
            .ok_or(TetherError::LoopClosed(self.thread))?;
        let body: CallBody = Box::new(body);
        handle.post(None, body)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("thread", &self.thread).finish()
    }
}
