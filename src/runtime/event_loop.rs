//! Event loop - the per-thread serial executor
//!
//! The loop drains a single FIFO queue of [`QueuedCall`]s, running each to
//! completion before taking the next. Posting is safe from any thread and wakes
//! a blocked loop. A stop request means "finish then exit": everything queued
//! when the stop is observed, and anything those calls post in turn, still runs.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::error::{Result, TetherError};
use crate::id::{ObjectId, ThreadId};
use crate::runtime::context::Context;
use crate::runtime::lock;

/// A zero-argument unit of work, run with the context of the executing thread
pub type CallBody = Box<dyn FnOnce(&Context) + Send + 'static>;

/// A marshalled deferred invocation
pub struct QueuedCall {
    seq: u64,
    target: Option<ObjectId>,
    body: CallBody,
}

impl QueuedCall {
    /// Position in the owning loop's enqueue order
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Object the call was addressed to, if any
    pub fn target(&self) -> Option<ObjectId> {
        self.target
    }
}

impl fmt::Debug for QueuedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedCall")
            .field("seq", &self.seq)
            .field("target", &self.target)
            .finish()
    }
}

/// A call body that panicked. Reported only on the thread that ran it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub thread: ThreadId,
    /// Sequence number of the queued call; `None` for lifecycle notifications
    pub seq: Option<u64>,
    pub target: Option<ObjectId>,
    pub message: String,
}

/// Counters returned when a loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Calls taken off the queue (including failed ones)
    pub executed: u64,
    /// Calls whose body panicked
    pub failed: u64,
    /// Calls executed after the stop request was observed
    pub drained: u64,
}

enum Envelope {
    Call(QueuedCall),
    Stop,
}

struct Shared {
    thread: ThreadId,
    name: String,
    tx: mpsc::UnboundedSender<Envelope>,
    // Held across the send so sequence numbers match queue order.
    next_seq: Mutex<u64>,
    stop_requested: AtomicBool,
}

/// Cloneable, thread-safe handle used to post into a loop
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl LoopHandle {
    pub fn thread(&self) -> ThreadId {
        self.shared.thread
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Append a call to the queue and wake the loop. Returns the call's sequence number.
    pub fn post(&self, target: Option<ObjectId>, body: CallBody) -> Result<u64> {
        let mut next = lock(&self.shared.next_seq);
        let seq = *next;
        self.shared
            .tx
            .send(Envelope::Call(QueuedCall { seq, target, body }))
            .map_err(|_| TetherError::LoopClosed(self.shared.thread))?;
        *next += 1;
        trace!(thread = %self.shared.thread, seq, target = ?target, "posted call");
        Ok(seq)
    }

    /// Ask the loop to exit once its queue is empty.
    ///
    /// Idempotent: returns `true` only for the request that took effect.
    pub fn request_stop(&self) -> bool {
        if self.shared.stop_requested.swap(true, Ordering::AcqRel) {
            debug!(thread = %self.shared.thread, "stop already requested");
            return false;
        }
        debug!(thread = %self.shared.thread, "stop requested");
        // A closed channel means the loop is already gone; nothing left to stop.
        let _ = self.shared.tx.send(Envelope::Stop);
        true
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }

    /// True once the loop has exited and refuses new calls
    pub fn is_closed(&self) -> bool {
        self.shared.tx.is_closed()
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("thread", &self.shared.thread)
            .field("name", &self.shared.name)
            .finish()
    }
}

/// The queue-draining executor owned by one thread
pub struct EventLoop {
    handle: LoopHandle,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl EventLoop {
    pub fn new(thread: ThreadId, name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            thread,
            name: name.into(),
            tx,
            next_seq: Mutex::new(0),
            stop_requested: AtomicBool::new(false),
        };
        Self {
            handle: LoopHandle {
                shared: Arc::new(shared),
            },
            rx,
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// The context calls on this loop execute with
    pub fn context(&self) -> Context {
        Context::on_loop(self.handle.clone())
    }

    /// Run until stopped, discarding failure reports (they are still logged)
    pub fn run(self) -> RunStats {
        self.run_with(|_, _| {})
    }

    /// Block the calling OS thread, executing queued calls until a stop has been
    /// observed and the queue is empty.
    ///
    /// Must not be called from inside an async runtime.
    pub fn run_with<F>(mut self, mut on_failure: F) -> RunStats
    where
        F: FnMut(&Context, CallFailure),
    {
        let ctx = self.context();
        let mut stats = RunStats::default();
        debug!(thread = %ctx.thread(), name = %self.handle.name(), "event loop running");

        while let Some(envelope) = self.rx.blocking_recv() {
            match envelope {
                Envelope::Call(call) => Self::execute(&ctx, call, &mut stats, &mut on_failure),
                Envelope::Stop => break,
            }
        }

        let before = stats.executed;
        self.drain(&ctx, &mut stats, &mut on_failure);
        // Refuse new posts, then pick up anything that raced the close.
        self.rx.close();
        self.drain(&ctx, &mut stats, &mut on_failure);
        stats.drained = stats.executed - before;

        debug!(
            thread = %ctx.thread(),
            executed = stats.executed,
            failed = stats.failed,
            drained = stats.drained,
            "event loop exited"
        );
        stats
    }

    fn drain<F>(&mut self, ctx: &Context, stats: &mut RunStats, on_failure: &mut F)
    where
        F: FnMut(&Context, CallFailure),
    {
        loop {
            match self.rx.try_recv() {
                Ok(Envelope::Call(call)) => Self::execute(ctx, call, stats, on_failure),
                Ok(Envelope::Stop) => continue,
                Err(_) => break,
            }
        }
    }

    fn execute<F>(ctx: &Context, call: QueuedCall, stats: &mut RunStats, on_failure: &mut F)
    where
        F: FnMut(&Context, CallFailure),
    {
        let QueuedCall { seq, target, body } = call;
        stats.executed += 1;
        trace!(thread = %ctx.thread(), seq, target = ?target, "executing call");
        if let Err(failure) = run_guarded(ctx.thread(), Some(seq), target, || body(ctx)) {
            stats.failed += 1;
            on_failure(ctx, failure);
        }
    }
}

/// Run `f`, converting a panic into a logged [`CallFailure`]
pub(crate) fn run_guarded<F>(
    thread: ThreadId,
    seq: Option<u64>,
    target: Option<ObjectId>,
    f: F,
) -> std::result::Result<(), CallFailure>
where
    F: FnOnce(),
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!(thread = %thread, seq = ?seq, target = ?target, error = %message, "call failed");
        CallFailure {
            thread,
            seq,
            target,
            message,
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
