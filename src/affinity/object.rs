//! Affine objects
//!
//! `Affine<T>` wraps private state `T` that is only ever touched by calls
//! executing on the object's affinity thread. Cross-thread invocations are
//! fire-and-forget; results flow back through signals.

use std::fmt;
use std::sync::{Arc, Mutex, TryLockError};

use tracing::{debug, warn};

use crate::affinity::anchor::{Anchor, Connection, Delivery, Receiver};
use crate::error::{Result, TetherError};
use crate::id::{ObjectId, ThreadId};
use crate::runtime::{Context, LoopHandle, Thread, lock};

/// Acknowledgement required to run an operation outside affinity dispatch.
///
/// The operation runs on the caller's thread, blocking the caller's event loop
/// for its whole duration.
#[derive(Debug, Clone, Copy)]
pub struct BypassAffinity(());

impl BypassAffinity {
    pub fn acknowledged() -> Self {
        Self(())
    }
}

struct Inner<T> {
    anchor: Arc<Anchor>,
    // Only the affinity thread locks this; a failed try_lock is a violation.
    state: Mutex<Option<T>>,
}

/// Handle to a stateful object bound to one thread
pub struct Affine<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Affine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Affine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Affine")
            .field("id", &self.inner.anchor.id())
            .field("label", &self.inner.anchor.label())
            .field("affinity", &self.inner.anchor.affinity())
            .finish()
    }
}

impl<T> Receiver for Affine<T> {
    fn anchor(&self) -> &Arc<Anchor> {
        &self.inner.anchor
    }
}

impl<T: Send + 'static> Affine<T> {
    pub(crate) fn new(label: impl Into<String>, state: T, home: LoopHandle) -> Self {
        Self {
            inner: Arc::new(Inner {
                anchor: Anchor::new(label, home),
                state: Mutex::new(Some(state)),
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.anchor.id()
    }

    pub fn label(&self) -> &str {
        self.inner.anchor.label()
    }

    pub fn affinity(&self) -> ThreadId {
        self.inner.anchor.affinity()
    }

    pub fn pending(&self) -> usize {
        self.inner.anchor.pending()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.anchor.is_disposed()
    }

    /// Invoke `op` with `Connection::Auto`
    pub fn invoke<F>(&self, caller: &Context, op: F) -> Result<Delivery>
    where
        F: FnOnce(&mut T, &Context) + Send + 'static,
    {
        self.invoke_with(caller, Connection::Auto, op)
    }

    /// Invoke `op` on the affinity thread. Never returns a result to a cross-thread caller.
    pub fn invoke_with<F>(&self, caller: &Context, connection: Connection, op: F) -> Result<Delivery>
    where
        F: FnOnce(&mut T, &Context) + Send + 'static,
    {
        let object = self.clone();
        self.inner
            .anchor
            .deliver(caller, connection, Box::new(move |ctx| object.apply(ctx, op)))
    }

    /// Run `op` synchronously and return its result.
    ///
    /// Only valid from the affinity thread, and not while the object is
    /// already executing a call.
    pub fn call<R, F>(&self, caller: &Context, op: F) -> Result<R>
    where
        F: FnOnce(&mut T, &Context) -> R,
    {
        self.inner.anchor.check_access(caller)?;
        self.borrow_with(caller, op)
    }

    /// Run `op` on the caller's thread regardless of affinity.
    ///
    /// The op blocks the caller's event loop for its whole duration. While it
    /// runs, calls reaching the affinity thread wait for it; if the affinity
    /// thread is mid-call, the caller waits for that call instead.
    pub fn call_bypassing_affinity<R, F>(&self, caller: &Context, _ack: BypassAffinity, op: F) -> Result<R>
    where
        F: FnOnce(&mut T, &Context) -> R,
    {
        warn!(
            object = %self.id(),
            label = %self.label(),
            caller = %caller.thread(),
            affinity = %self.affinity(),
            "call bypassing affinity runs on the caller's thread"
        );
        self.borrow_with(caller, op)
    }

    /// Move the object onto `thread`. Caller must be on the current affinity thread.
    pub fn move_to(&self, caller: &Context, thread: &Thread) -> Result<()> {
        self.inner.anchor.rebind(caller, thread.handle())
    }

    /// Queue disposal behind every call already queued for this object.
    ///
    /// Calls accepted before disposal still run; later ones are dropped.
    pub fn dispose(&self, caller: &Context) -> Result<Delivery> {
        let object = self.clone();
        self.inner.anchor.deliver(
            caller,
            Connection::Queued,
            Box::new(move |_ctx| {
                let state = lock(&object.inner.state).take();
                object.inner.anchor.mark_disposed();
                drop(state);
            }),
        )
    }

    /// Execute `op` against the state on the current thread (the affinity thread).
    ///
    /// Blocks while a bypassing call on another thread holds the state; the
    /// call still runs once the state is released.
    pub(crate) fn apply<F>(&self, ctx: &Context, op: F)
    where
        F: FnOnce(&mut T, &Context),
    {
        let mut guard = match self.inner.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                warn!(
                    object = %self.id(),
                    label = %self.label(),
                    thread = %ctx.thread(),
                    "state held by a bypassing call; waiting"
                );
                lock(&self.inner.state)
            }
        };
        Self::run_on(&mut guard, self.id(), ctx, op)
    }

    fn run_on<F>(state: &mut Option<T>, id: ObjectId, ctx: &Context, op: F)
    where
        F: FnOnce(&mut T, &Context),
    {
        match state.as_mut() {
            Some(state) => op(state, ctx),
            None => debug!(object = %id, "call reached disposed object; dropped"),
        }
    }

    fn borrow_with<R, F>(&self, caller: &Context, op: F) -> Result<R>
    where
        F: FnOnce(&mut T, &Context) -> R,
    {
        let anchor = &self.inner.anchor;
        let on_affinity = caller.thread() == anchor.affinity();
        if on_affinity && anchor.is_executing() {
            return Err(TetherError::Reentrant(self.id()));
        }
        // Same-thread calls made from inside `op` queue instead of relocking.
        let _executing = on_affinity.then(|| anchor.enter());
        let mut guard = lock(&self.inner.state);
        let state = guard.as_mut().ok_or(TetherError::Disposed(self.id()))?;
        Ok(op(state, caller))
    }
}
