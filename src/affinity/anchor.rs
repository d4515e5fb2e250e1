//! Affinity anchor - the binding between an object and its thread
//!
//! Every affine thing (worker objects, windows, the thread handles themselves)
//! carries an [`Anchor`]. The anchor is where the dispatch decision is made:
//! a call from the affinity thread runs in place, any other call is wrapped
//! and posted onto the affinity thread's queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, trace};

use crate::error::{Result, TetherError};
use crate::id::{ObjectId, ThreadId};
use crate::runtime::{CallBody, Context, LoopHandle, lock};

/// How a call is routed to its target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Connection {
    /// Run in place when the caller is on the target's affinity thread, queue otherwise
    #[default]
    Auto,
    /// Always queue, even from the affinity thread
    Queued,
}

/// What happened to a dispatched call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Executed synchronously on the caller's thread before returning
    Direct,
    /// Posted to the affinity thread's queue
    Queued { seq: u64 },
}

impl Delivery {
    pub fn is_queued(&self) -> bool {
        matches!(self, Delivery::Queued { .. })
    }
}

/// Anything that can receive dispatched calls
pub trait Receiver {
    fn anchor(&self) -> &Arc<Anchor>;
}

struct Binding {
    home: LoopHandle,
    /// Queued calls accepted but not yet completed
    pending: usize,
    /// The object is its thread's execution unit and cannot move
    unit: bool,
    disposed: bool,
}

/// Affinity record of one object
pub struct Anchor {
    id: ObjectId,
    label: String,
    binding: Mutex<Binding>,
    executing: AtomicBool,
}

impl Anchor {
    pub(crate) fn new(label: impl Into<String>, home: LoopHandle) -> Arc<Self> {
        let anchor = Arc::new(Self {
            id: ObjectId::next(),
            label: label.into(),
            binding: Mutex::new(Binding {
                home,
                pending: 0,
                unit: false,
                disposed: false,
            }),
            executing: AtomicBool::new(false),
        });
        trace!(object = %anchor.id, label = %anchor.label, affinity = %anchor.affinity(), "anchor created");
        anchor
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Thread this object's calls execute on
    pub fn affinity(&self) -> ThreadId {
        lock(&self.binding).home.thread()
    }

    /// Number of queued calls not yet completed
    pub fn pending(&self) -> usize {
        lock(&self.binding).pending
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.binding).disposed
    }

    pub fn is_unit(&self) -> bool {
        lock(&self.binding).unit
    }

    /// True while a call on this object is running
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    pub(crate) fn home(&self) -> LoopHandle {
        lock(&self.binding).home.clone()
    }

    pub(crate) fn pin_as_unit(&self) {
        lock(&self.binding).unit = true;
    }

    pub(crate) fn mark_disposed(&self) {
        lock(&self.binding).disposed = true;
        info!(object = %self.id, label = %self.label, "disposed");
    }

    /// Route `body` to this object's affinity thread.
    ///
    /// A same-thread `Auto` call runs before this returns, unless the object is
    /// already executing; that re-entrant call is appended to the queue instead.
    pub(crate) fn deliver(
        self: &Arc<Self>,
        caller: &Context,
        connection: Connection,
        body: CallBody,
    ) -> Result<Delivery> {
        let mut binding = lock(&self.binding);
        if binding.disposed {
            debug!(object = %self.id, label = %self.label, caller = %caller.thread(), "call to disposed object dropped");
            return Err(TetherError::Disposed(self.id));
        }

        let affinity = binding.home.thread();
        let same_thread = caller.thread() == affinity;
        if connection == Connection::Auto && same_thread && !self.is_executing() {
            drop(binding);
            trace!(object = %self.id, label = %self.label, thread = %affinity, "direct call");
            self.execute(caller, body);
            return Ok(Delivery::Direct);
        }

        let anchor = Arc::clone(self);
        let seq = binding
            .home
            .post(Some(self.id), Box::new(move |ctx| anchor.settle(ctx, body)))?;
        binding.pending += 1;
        debug!(
            object = %self.id,
            label = %self.label,
            caller = %caller.thread(),
            affinity = %affinity,
            seq,
            reentrant = same_thread,
            "queued call"
        );
        Ok(Delivery::Queued { seq })
    }

    /// Move this object onto another thread's loop.
    ///
    /// Only the current affinity thread may move an object, and only while no
    /// queued call targets it.
    pub(crate) fn rebind(&self, caller: &Context, target: LoopHandle) -> Result<()> {
        let mut binding = lock(&self.binding);
        if binding.disposed {
            return Err(TetherError::Disposed(self.id));
        }
        if binding.unit {
            return Err(TetherError::ThreadUnit(self.id));
        }
        let affinity = binding.home.thread();
        if caller.thread() != affinity {
            return Err(TetherError::AffinityViolation {
                object: self.id,
                caller: caller.thread(),
                affinity,
            });
        }
        if binding.pending > 0 {
            return Err(TetherError::CallsInFlight {
                object: self.id,
                pending: binding.pending,
            });
        }
        if target.is_closed() {
            return Err(TetherError::LoopClosed(target.thread()));
        }
        info!(object = %self.id, label = %self.label, from = %affinity, to = %target.thread(), "affinity moved");
        binding.home = target;
        Ok(())
    }

    /// Refuse access unless `caller` is on the affinity thread
    pub(crate) fn check_access(&self, caller: &Context) -> Result<()> {
        let affinity = self.affinity();
        if caller.thread() != affinity {
            return Err(TetherError::AffinityViolation {
                object: self.id,
                caller: caller.thread(),
                affinity,
            });
        }
        Ok(())
    }

    /// Body of a queued call once it reaches the affinity thread's loop
    fn settle(&self, ctx: &Context, body: CallBody) {
        let _in_flight = InFlight(self);
        let (affinity, disposed) = {
            let binding = lock(&self.binding);
            (binding.home.thread(), binding.disposed)
        };
        if disposed {
            debug!(object = %self.id, label = %self.label, "queued call reached disposed object; dropped");
            return;
        }
        if ctx.thread() != affinity {
            let err = TetherError::AffinityViolation {
                object: self.id,
                caller: ctx.thread(),
                affinity,
            };
            error!(error = %err, "queued call refused");
            return;
        }
        self.execute(ctx, body);
    }

    fn execute(&self, ctx: &Context, body: CallBody) {
        let _executing = self.enter();
        body(ctx);
    }

    /// Mark the object busy on the affinity thread until the guard drops
    pub(crate) fn enter(&self) -> Executing<'_> {
        Executing::enter(&self.executing)
    }
}

/// Decrements the pending count when a queued call completes, even by panic
struct InFlight<'a>(&'a Anchor);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut binding = lock(&self.0.binding);
        binding.pending = binding.pending.saturating_sub(1);
    }
}

pub(crate) struct Executing<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl<'a> Executing<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        let previous = flag.swap(true, Ordering::AcqRel);
        Self { flag, previous }
    }
}

impl Drop for Executing<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::Release);
    }
}
