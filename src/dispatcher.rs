//! Dispatcher - the composition root
//!
//! The dispatcher owns the main thread, creates worker threads and affine
//! objects, and keeps a registry of live threads so teardown can find them.
//! Everything it hands out resolves calls through the affinity rules; the
//! dispatcher itself never executes object state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::affinity::{Affine, Delivery};
use crate::error::Result;
use crate::halt::{DEFAULT_POLL_INTERVAL, HaltFlag};
use crate::id::ThreadId;
use crate::runtime::{Context, LoopHandle, RunStats, Thread, ThreadState, lock};
use crate::signal::Signal;
use crate::worker::{Placement, Worker};

/// Default deadline for joining a worker thread during shutdown
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the Dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Interval between halt checks for every worker's flag
    pub halt_poll: Duration,
    /// How long shutdown waits for each thread
    pub join_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            halt_poll: DEFAULT_POLL_INTERVAL,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}

impl DispatcherConfig {
    pub fn with_halt_poll(mut self, halt_poll: Duration) -> Self {
        self.halt_poll = halt_poll;
        self
    }

    pub fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }
}

/// Wires objects to threads and signals to follow-up calls
pub struct Dispatcher {
    config: DispatcherConfig,
    main: Arc<Thread>,
    threads: Mutex<HashMap<ThreadId, Arc<Thread>>>,
}

impl Dispatcher {
    /// Create a dispatcher with an unstarted main thread.
    ///
    /// The OS thread that later calls [`Dispatcher::exec`] becomes main, so
    /// setup code on that thread uses [`Dispatcher::main_context`].
    pub fn new(config: DispatcherConfig) -> Self {
        let main = Thread::main("main");
        info!(thread = %main.id(), halt_poll = ?config.halt_poll, "dispatcher created");
        Self {
            config,
            main,
            threads: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn main(&self) -> &Arc<Thread> {
        &self.main
    }

    /// Context for code running on the main thread
    pub fn main_context(&self) -> Context {
        Context::on_loop(self.main.handle())
    }

    /// Run the main loop on the calling OS thread until main is asked to quit
    pub fn exec(&self) -> Result<RunStats> {
        self.main.exec()
    }

    /// Create a new, unstarted thread owned by the caller's thread.
    ///
    /// A caller with no event loop hands ownership to main.
    pub fn spawn_thread(&self, caller: &Context, name: impl Into<String>) -> Arc<Thread> {
        let thread = Thread::new(name, &self.home_for(caller));
        let mut threads = lock(&self.threads);
        threads.retain(|_, t| !t.is_disposed());
        threads.insert(thread.id(), Arc::clone(&thread));
        drop(threads);
        debug!(thread = %thread.id(), name = %thread.name(), owner = %thread.affinity(), "thread registered");
        thread
    }

    /// Create an affine object bound to the caller's thread (main for a foreign caller)
    pub fn create<T: Send + 'static>(&self, caller: &Context, label: impl Into<String>, state: T) -> Affine<T> {
        Affine::new(label, state, self.home_for(caller))
    }

    pub fn move_to_thread<T: Send + 'static>(&self, caller: &Context, object: &Affine<T>, thread: &Thread) -> Result<()> {
        object.move_to(caller, thread)
    }

    /// Create a worker object and place it.
    ///
    /// `OwnsThread` creates a dedicated thread whose execution unit is the
    /// object. `Borrows` creates the object on the caller's thread and moves it
    /// onto the given thread, so the caller must be on a loop.
    pub fn spawn_worker<T, B>(
        &self,
        caller: &Context,
        label: impl Into<String>,
        state: T,
        placement: Placement,
        body: B,
    ) -> Result<Worker<T>>
    where
        T: Send + 'static,
        B: FnOnce(&mut T, &Context, &HaltFlag) + Send + 'static,
    {
        let label = label.into();
        let (object, thread, owns_thread) = match placement {
            Placement::OwnsThread => {
                let thread = self.spawn_thread(caller, format!("{}-thread", label));
                let object = Affine::new(label, state, thread.handle());
                (object, thread, true)
            }
            Placement::Borrows(thread) => {
                let object = self.create(caller, label, state);
                object.move_to(caller, &thread)?;
                (object, thread, false)
            }
        };
        let halt = HaltFlag::for_object(object.id(), self.config.halt_poll);
        Ok(Worker::new(object, thread, owns_thread, halt, body))
    }

    pub fn start<T: Send + 'static>(&self, caller: &Context, worker: &Worker<T>) -> Result<()> {
        worker.start(caller)
    }

    /// Cooperative stop request; callable from any thread
    pub fn request_halt<T: Send + 'static>(&self, worker: &Worker<T>) -> bool {
        worker.request_halt()
    }

    /// Register `op` on `listener` to run when `signal` is raised.
    ///
    /// Must be registered before the raise it should observe.
    pub fn on_completion<A, T, F>(&self, signal: &Signal<A>, listener: &Affine<T>, op: F)
    where
        A: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(&mut T, &Context, A) + Send + Sync + 'static,
    {
        signal.connect(listener, op);
    }

    /// Ask `thread` to exit once drained. A request made before the thread
    /// starts is kept and takes effect right after `start`.
    pub fn request_quit(&self, thread: &Thread) -> bool {
        thread.request_quit()
    }

    /// Queue disposal of an object behind its pending calls
    pub fn dispose<T: Send + 'static>(&self, caller: &Context, object: &Affine<T>) -> Result<Delivery> {
        object.dispose(caller)
    }

    /// Queue disposal of a finished thread on its owner
    pub fn dispose_thread(&self, caller: &Context, thread: &Arc<Thread>) -> Result<Delivery> {
        thread.dispose(caller)
    }

    /// Live threads, excluding main. Disposed threads are dropped from the registry.
    pub fn threads(&self) -> Vec<Arc<Thread>> {
        let mut threads = lock(&self.threads);
        threads.retain(|_, t| !t.is_disposed());
        let mut live: Vec<_> = threads.values().cloned().collect();
        live.sort_by_key(|t| t.id());
        live
    }

    pub fn thread(&self, id: ThreadId) -> Option<Arc<Thread>> {
        if id == self.main.id() {
            return Some(Arc::clone(&self.main));
        }
        lock(&self.threads).get(&id).filter(|t| !t.is_disposed()).cloned()
    }

    /// Ask every registered thread to quit and wait for each one.
    ///
    /// Every thread is tried; the first failure is returned. Threads that
    /// finished leave the registry.
    pub fn shutdown(&self, caller: &Context) -> Result<()> {
        let threads = self.threads();
        info!(caller = %caller.thread(), threads = threads.len(), "shutting down");

        let mut first_err = None;
        for thread in &threads {
            thread.request_quit();
            if let Err(e) = thread.wait(caller, Some(self.config.join_timeout)) {
                warn!(thread = %thread.id(), error = %e, "thread did not finish");
                first_err.get_or_insert(e);
            }
        }
        let mut registry = lock(&self.threads);
        registry.retain(|_, t| t.state() != ThreadState::Finished && !t.is_disposed());
        debug!(remaining = registry.len(), "registry pruned");
        drop(registry);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn home_for(&self, caller: &Context) -> LoopHandle {
        caller.handle().cloned().unwrap_or_else(|| self.main.handle())
    }
}
