//! Workers - an affine object with a run body and a thread to run it on
//!
//! A worker either owns its thread (the object is that thread's execution
//! unit) or borrows an existing thread it was moved onto. Both shapes share
//! the same pieces: the object, the thread, a `done` signal raised when the run
//! body returns, and a halt flag the body can poll.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::affinity::{Affine, Connection, Receiver};
use crate::error::{Result, TetherError};
use crate::halt::HaltFlag;
use crate::runtime::{Context, Thread, ThreadState, lock};
use crate::signal::Signal;

/// Where a worker's run body executes
#[derive(Debug, Clone)]
pub enum Placement {
    /// The object is the execution unit of a new thread created for it
    OwnsThread,
    /// The object is moved onto an existing thread and runs when it starts
    Borrows(Arc<Thread>),
}

type RunBody<T> = Box<dyn FnOnce(&mut T, &Context, &HaltFlag) + Send + 'static>;

/// An affine object plus the lifecycle plumbing to run it
pub struct Worker<T> {
    object: Affine<T>,
    thread: Arc<Thread>,
    done: Arc<Signal>,
    halt: HaltFlag,
    owns_thread: bool,
    body: Arc<Mutex<Option<RunBody<T>>>>,
    launched: Arc<AtomicBool>,
}

impl<T> Clone for Worker<T> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
            thread: Arc::clone(&self.thread),
            done: Arc::clone(&self.done),
            halt: self.halt.clone(),
            owns_thread: self.owns_thread,
            body: Arc::clone(&self.body),
            launched: Arc::clone(&self.launched),
        }
    }
}

impl<T> fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("object", &self.object)
            .field("thread", &self.thread.id())
            .field("owns_thread", &self.owns_thread)
            .field("halted", &self.halt.is_halted())
            .finish()
    }
}

impl<T: Send + 'static> Worker<T> {
    pub(crate) fn new<B>(object: Affine<T>, thread: Arc<Thread>, owns_thread: bool, halt: HaltFlag, body: B) -> Self
    where
        B: FnOnce(&mut T, &Context, &HaltFlag) + Send + 'static,
    {
        if owns_thread {
            object.anchor().pin_as_unit();
        }
        let done = Arc::new(Signal::new(format!("{}.done", object.label())));
        Self {
            object,
            thread,
            done,
            halt,
            owns_thread,
            body: Arc::new(Mutex::new(Some(Box::new(body)))),
            launched: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn object(&self) -> &Affine<T> {
        &self.object
    }

    pub fn thread(&self) -> &Arc<Thread> {
        &self.thread
    }

    /// Raised on the worker's thread when the run body returns
    pub fn done(&self) -> &Signal {
        &self.done
    }

    pub fn halt(&self) -> &HaltFlag {
        &self.halt
    }

    pub fn owns_thread(&self) -> bool {
        self.owns_thread
    }

    /// Cooperative stop. Safe from any thread.
    pub fn request_halt(&self) -> bool {
        self.halt.request_halt()
    }

    /// Schedule the run body and start the thread if it is not running yet.
    ///
    /// An owned thread runs the body as its first queued call and quits after
    /// it. A borrowed thread runs the body from its `started` signal, or as a
    /// queued call when the thread is already running.
    pub fn start(&self, caller: &Context) -> Result<()> {
        if self.launched.swap(true, Ordering::AcqRel) {
            return Err(TetherError::DoubleStart(self.thread.id()));
        }
        info!(
            object = %self.object.id(),
            label = %self.object.label(),
            thread = %self.thread.id(),
            owns_thread = self.owns_thread,
            "starting worker"
        );

        if self.owns_thread {
            let run = self.run_once();
            let thread = Arc::clone(&self.thread);
            self.object.invoke_with(caller, Connection::Queued, move |state, ctx| {
                run(state, ctx);
                thread.request_quit();
            })?;
            return self.thread.start();
        }

        if self.thread.state() == ThreadState::Unstarted {
            let run = self.run_once();
            self.thread
                .started()
                .connect(&self.object, move |state, ctx, ()| run(state, ctx));
            self.thread.start()
        } else {
            debug!(thread = %self.thread.id(), "borrowed thread already running; queueing body");
            let run = self.run_once();
            self.object
                .invoke_with(caller, Connection::Queued, move |state, ctx| run(state, ctx))?;
            Ok(())
        }
    }

    /// Wire the canonical teardown: `done` quits the thread and disposes the
    /// object, then `finished` disposes the thread.
    pub fn wire_teardown(&self) {
        self.thread.quit_when(&self.done);

        let object = self.object.clone();
        self.done.connect_fn(&self.object, Connection::Auto, move |ctx, ()| {
            if let Err(e) = object.dispose(ctx) {
                warn!(object = %object.id(), error = %e, "worker dispose refused");
            }
        });

        self.thread.dispose_when(self.thread.finished());
    }

    /// Run the body at most once, then raise `done`
    fn run_once(&self) -> impl Fn(&mut T, &Context) + Send + Sync + 'static {
        let body = Arc::clone(&self.body);
        let done = Arc::clone(&self.done);
        let halt = self.halt.clone();
        move |state: &mut T, ctx: &Context| {
            let Some(body) = lock(&body).take() else {
                debug!(thread = %ctx.thread(), "run body already consumed");
                return;
            };
            body(state, ctx, &halt);
            done.raise(ctx, ());
        }
    }
}
