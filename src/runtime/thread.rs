//! Thread - an OS thread that owns exactly one event loop
//!
//! A `Thread` is created Unstarted, spawns its OS thread on `start`, and runs
//! its loop until a quit request has been observed and the queue is drained.
//! The handle itself is an affine object whose affinity is the thread that
//! created it, so `quit` and `dispose` wired to signals execute on the owner.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::affinity::{Anchor, Connection, Delivery, Receiver};
use crate::error::{Result, TetherError};
use crate::id::ThreadId;
use crate::runtime::event_loop::{CallFailure, EventLoop, LoopHandle, RunStats, run_guarded};
use crate::runtime::{Context, lock};
use crate::signal::Signal;

/// Lifecycle of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Unstarted,
    Running,
    QuitRequested,
    Finished,
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThreadState::Unstarted => "unstarted",
            ThreadState::Running => "running",
            ThreadState::QuitRequested => "quit-requested",
            ThreadState::Finished => "finished",
        };
        write!(f, "{}", s)
    }
}

/// A thread of execution with its own event loop
pub struct Thread {
    id: ThreadId,
    name: String,
    anchor: Arc<Anchor>,
    handle: LoopHandle,
    event_loop: Mutex<Option<EventLoop>>,
    state: Mutex<ThreadState>,
    state_changed: Condvar,
    join: Mutex<Option<JoinHandle<()>>>,
    started: Signal,
    finished: Signal,
    failed: Signal<CallFailure>,
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("affinity", &self.anchor.affinity())
            .finish()
    }
}

impl Receiver for Thread {
    fn anchor(&self) -> &Arc<Anchor> {
        &self.anchor
    }
}

impl Thread {
    /// Create an unstarted thread owned by the thread running `owner`
    pub(crate) fn new(name: impl Into<String>, owner: &LoopHandle) -> Arc<Self> {
        let name = name.into();
        let event_loop = EventLoop::new(ThreadId::next(), name.clone());
        Self::assemble(name, event_loop, owner.clone())
    }

    /// Create the thread adopted by whoever calls [`Thread::exec`]. It owns itself.
    pub(crate) fn main(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let event_loop = EventLoop::new(ThreadId::next(), name.clone());
        let own = event_loop.handle();
        Self::assemble(name, event_loop, own)
    }

    fn assemble(name: String, event_loop: EventLoop, owner: LoopHandle) -> Arc<Self> {
        let handle = event_loop.handle();
        let id = handle.thread();
        let thread = Arc::new(Self {
            id,
            anchor: Anchor::new(format!("thread:{}", name), owner),
            handle,
            event_loop: Mutex::new(Some(event_loop)),
            state: Mutex::new(ThreadState::Unstarted),
            state_changed: Condvar::new(),
            join: Mutex::new(None),
            started: Signal::new(format!("{}.started", name)),
            finished: Signal::new(format!("{}.finished", name)),
            failed: Signal::new(format!("{}.failed", name)),
            name,
        });
        debug!(thread = %thread.id, name = %thread.name, owner = %thread.anchor.affinity(), "thread created");
        thread
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        *lock(&self.state)
    }

    /// The thread that owns this handle
    pub fn affinity(&self) -> ThreadId {
        self.anchor.affinity()
    }

    /// Handle for posting into this thread's loop
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.anchor.is_disposed()
    }

    /// Raised on the new thread before its loop starts taking calls
    pub fn started(&self) -> &Signal {
        &self.started
    }

    /// Raised on the thread after its loop drained and exited
    pub fn finished(&self) -> &Signal {
        &self.finished
    }

    /// Raised on the thread for every call body that panicked
    pub fn failed(&self) -> &Signal<CallFailure> {
        &self.failed
    }

    /// Spawn the OS thread and run the loop on it
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let event_loop = self.claim_loop()?;
        let thread = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                thread.drive(event_loop);
            });

        match spawned {
            Ok(join) => {
                *lock(&self.join) = Some(join);
                Ok(())
            }
            Err(e) => {
                // The loop went down with the closure; nothing will ever run.
                self.set_state(ThreadState::Finished);
                Err(e.into())
            }
        }
    }

    /// Run the loop on the calling OS thread until a quit is requested
    pub fn exec(self: &Arc<Self>) -> Result<RunStats> {
        let event_loop = self.claim_loop()?;
        Ok(self.drive(event_loop))
    }

    /// Ask the loop to exit once drained. Returns `true` only for the request
    /// that took effect. On a thread that has not started yet the request is
    /// kept, and the thread exits as soon as it has drained after `start`.
    pub fn request_quit(&self) -> bool {
        let mut state = lock(&self.state);
        match *state {
            ThreadState::Running => {
                *state = ThreadState::QuitRequested;
                drop(state);
                self.handle.request_stop();
                info!(thread = %self.id, name = %self.name, "quit requested");
                true
            }
            ThreadState::Unstarted => {
                drop(state);
                // Latched on the loop: a later start drains what is queued, then exits.
                let latched = self.handle.request_stop();
                if latched {
                    info!(thread = %self.id, name = %self.name, "quit requested before start");
                }
                latched
            }
            ThreadState::QuitRequested | ThreadState::Finished => {
                debug!(thread = %self.id, name = %self.name, state = %*state, "quit already requested");
                false
            }
        }
    }

    /// Block the caller until this thread is Finished.
    ///
    /// A thread never waits on itself. A thread that was never started is
    /// treated as already finished.
    pub fn wait(&self, caller: &Context, timeout: Option<Duration>) -> Result<()> {
        if caller.thread() == self.id {
            return Err(TetherError::SelfJoin(self.id));
        }

        let state = lock(&self.state);
        if *state == ThreadState::Unstarted {
            return Ok(());
        }
        let not_finished = |s: &mut ThreadState| *s != ThreadState::Finished;
        match timeout {
            Some(limit) => {
                let (state, _) = self
                    .state_changed
                    .wait_timeout_while(state, limit, not_finished)
                    .unwrap_or_else(PoisonError::into_inner);
                if *state != ThreadState::Finished {
                    warn!(thread = %self.id, caller = %caller.thread(), timeout = ?limit, "wait timed out");
                    return Err(TetherError::JoinTimeout(self.id));
                }
            }
            None => {
                drop(
                    self.state_changed
                        .wait_while(state, not_finished)
                        .unwrap_or_else(PoisonError::into_inner),
                );
            }
        }

        self.reap();
        Ok(())
    }

    /// Queue disposal of this handle on its owner thread.
    ///
    /// Only a Finished thread can be disposed.
    pub fn dispose(self: &Arc<Self>, caller: &Context) -> Result<Delivery> {
        if self.state() != ThreadState::Finished {
            return Err(TetherError::ThreadRunning(self.id));
        }
        let thread = Arc::clone(self);
        self.anchor.deliver(
            caller,
            Connection::Queued,
            Box::new(move |_ctx| {
                thread.reap();
                thread.anchor.mark_disposed();
            }),
        )
    }

    /// Connect `signal` to this thread's quit request, executed on the owner
    pub fn quit_when<A>(self: &Arc<Self>, signal: &Signal<A>)
    where
        A: Clone + Send + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        signal.connect_fn(&**self, Connection::Auto, move |_ctx, _| {
            if let Some(thread) = weak.upgrade() {
                thread.request_quit();
            }
        });
    }

    /// Connect `signal` to this thread's disposal, executed on the owner
    pub fn dispose_when<A>(self: &Arc<Self>, signal: &Signal<A>)
    where
        A: Clone + Send + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        signal.connect_fn(&**self, Connection::Auto, move |ctx, _| {
            if let Some(thread) = weak.upgrade() {
                if let Err(e) = thread.dispose(ctx) {
                    warn!(thread = %thread.id, error = %e, "dispose refused");
                }
            }
        });
    }

    fn claim_loop(&self) -> Result<EventLoop> {
        let mut state = lock(&self.state);
        if *state != ThreadState::Unstarted {
            warn!(thread = %self.id, name = %self.name, state = %*state, "start refused");
            return Err(TetherError::DoubleStart(self.id));
        }
        let event_loop = lock(&self.event_loop)
            .take()
            .ok_or(TetherError::DoubleStart(self.id))?;
        *state = if self.handle.stop_requested() {
            ThreadState::QuitRequested
        } else {
            ThreadState::Running
        };
        Ok(event_loop)
    }

    fn drive(&self, event_loop: EventLoop) -> RunStats {
        let ctx = event_loop.context();
        info!(thread = %self.id, name = %self.name, "thread started");

        if let Err(failure) = run_guarded(self.id, None, None, || {
            self.started.raise(&ctx, ());
        }) {
            self.failed.raise(&ctx, failure);
        }

        let stats = event_loop.run_with(|ctx, failure| {
            self.failed.raise(ctx, failure);
        });

        self.set_state(ThreadState::Finished);
        info!(
            thread = %self.id,
            name = %self.name,
            executed = stats.executed,
            failed = stats.failed,
            drained = stats.drained,
            "thread finished"
        );

        if let Err(failure) = run_guarded(self.id, None, None, || {
            self.finished.raise(&ctx, ());
        }) {
            self.failed.raise(&ctx, failure);
        }
        stats
    }

    fn set_state(&self, next: ThreadState) {
        let mut state = lock(&self.state);
        debug!(thread = %self.id, from = %*state, to = %next, "thread state");
        *state = next;
        self.state_changed.notify_all();
    }

    fn reap(&self) {
        let join = lock(&self.join).take();
        if let Some(join) = join {
            if join.join().is_err() {
                warn!(thread = %self.id, name = %self.name, "thread exited by panic");
            }
        }
    }
}
