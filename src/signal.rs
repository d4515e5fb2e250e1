//! Completion signals
//!
//! A signal is a notification point. Raising it snapshots the listener list and
//! dispatches one call per listener, each resolved against that listener's own
//! affinity. Listeners that share a thread are reached in registration order;
//! listeners on different threads have no ordering guarantee between them.
//!
//! Listeners connected after a raise do not receive it. Connect before raising.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::affinity::{Affine, Anchor, Connection, Delivery, Receiver};
use crate::id::ObjectId;
use crate::runtime::{Context, lock};

type Slot<A> = Arc<dyn Fn(&Context, A) + Send + Sync>;

struct Listener<A> {
    anchor: Arc<Anchor>,
    connection: Connection,
    slot: Slot<A>,
}

impl<A> Clone for Listener<A> {
    fn clone(&self) -> Self {
        Self {
            anchor: Arc::clone(&self.anchor),
            connection: self.connection,
            slot: Arc::clone(&self.slot),
        }
    }
}

/// A notification point with an ordered list of listeners
pub struct Signal<A = ()> {
    name: String,
    listeners: Mutex<Vec<Listener<A>>>,
    raised: AtomicU64,
}

impl<A> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("listeners", &lock(&self.listeners).len())
            .field("raised", &self.raised.load(Ordering::Relaxed))
            .finish()
    }
}

impl<A: Clone + Send + 'static> Signal<A> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listeners: Mutex::new(Vec::new()),
            raised: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// How many times the signal has been raised
    pub fn raise_count(&self) -> u64 {
        self.raised.load(Ordering::Acquire)
    }

    /// Connect a slot on an affine object with `Connection::Auto`
    pub fn connect<T, F>(&self, target: &Affine<T>, slot: F)
    where
        T: Send + 'static,
        F: Fn(&mut T, &Context, A) + Send + Sync + 'static,
    {
        self.connect_with(target, Connection::Auto, slot);
    }

    pub fn connect_with<T, F>(&self, target: &Affine<T>, connection: Connection, slot: F)
    where
        T: Send + 'static,
        F: Fn(&mut T, &Context, A) + Send + Sync + 'static,
    {
        let object = target.clone();
        self.attach(
            Arc::clone(target.anchor()),
            connection,
            Arc::new(move |ctx: &Context, args: A| object.apply(ctx, |state, ctx| slot(state, ctx, args))),
        );
    }

    /// Connect a stateless slot that runs on `receiver`'s affinity thread
    pub fn connect_fn<R, F>(&self, receiver: &R, connection: Connection, slot: F)
    where
        R: Receiver + ?Sized,
        F: Fn(&Context, A) + Send + Sync + 'static,
    {
        self.attach(Arc::clone(receiver.anchor()), connection, Arc::new(slot));
    }

    /// Remove every listener addressed to `object`. Returns how many were removed.
    pub fn disconnect(&self, object: ObjectId) -> usize {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|l| l.anchor.id() != object);
        before - listeners.len()
    }

    /// Dispatch one call per listener registered at this moment.
    ///
    /// Returns the deliveries that were accepted; listeners whose target is
    /// disposed or whose loop has exited are skipped and logged.
    pub fn raise(&self, caller: &Context, args: A) -> Vec<Delivery> {
        let snapshot: Vec<Listener<A>> = lock(&self.listeners).clone();
        let count = self.raised.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            signal = %self.name,
            caller = %caller.thread(),
            listeners = snapshot.len(),
            raise = count,
            "raising signal"
        );

        let mut deliveries = Vec::with_capacity(snapshot.len());
        for listener in snapshot {
            let slot = Arc::clone(&listener.slot);
            let args = args.clone();
            match listener
                .anchor
                .deliver(caller, listener.connection, Box::new(move |ctx| slot(ctx, args)))
            {
                Ok(delivery) => deliveries.push(delivery),
                Err(err) => warn!(
                    signal = %self.name,
                    object = %listener.anchor.id(),
                    error = %err,
                    "listener not reached"
                ),
            }
        }
        deliveries
    }

    fn attach(&self, anchor: Arc<Anchor>, connection: Connection, slot: Slot<A>) {
        let raised = self.raise_count();
        if raised > 0 {
            debug!(
                signal = %self.name,
                object = %anchor.id(),
                missed = raised,
                "listener connected after earlier raises; they are not replayed"
            );
        }
        lock(&self.listeners).push(Listener {
            anchor,
            connection,
            slot,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ThreadId;
    use crate::runtime::EventLoop;

    fn log_object(event_loop: &EventLoop, label: &str) -> Affine<Vec<String>> {
        Affine::new(label, Vec::new(), event_loop.handle())
    }

    #[test]
    fn test_raise_delivers_one_call_per_listener() {
        let event_loop = EventLoop::new(ThreadId::next(), "sig");
        let ctx = event_loop.context();
        let signal: Signal<u32> = Signal::new("done");
        let a = log_object(&event_loop, "a");
        let b = log_object(&event_loop, "b");

        signal.connect(&a, |log, _, n| log.push(format!("a{}", n)));
        signal.connect(&b, |log, _, n| log.push(format!("b{}", n)));

        let deliveries = signal.raise(&Context::foreign(), 7);
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries.iter().all(|d| d.is_queued()));

        event_loop.handle().request_stop();
        event_loop.run();
        assert_eq!(a.call(&ctx, |log, _| log.clone()).unwrap(), vec!["a7"]);
        assert_eq!(b.call(&ctx, |log, _| log.clone()).unwrap(), vec!["b7"]);
    }

    #[test]
    fn test_same_thread_listeners_keep_registration_order() {
        let event_loop = EventLoop::new(ThreadId::next(), "sig");
        let order = Arc::new(Mutex::new(Vec::new()));
        let signal: Signal = Signal::new("done");
        let first = log_object(&event_loop, "first");
        let second = log_object(&event_loop, "second");

        let o = order.clone();
        signal.connect(&second, move |_, _, ()| o.lock().unwrap().push("second"));
        let o = order.clone();
        signal.connect(&first, move |_, _, ()| o.lock().unwrap().push("first"));

        signal.raise(&Context::foreign(), ());
        event_loop.handle().request_stop();
        event_loop.run();
        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    }

    #[test]
    fn test_late_listener_misses_earlier_raise() {
        let event_loop = EventLoop::new(ThreadId::next(), "sig");
        let ctx = event_loop.context();
        let signal: Signal = Signal::new("done");
        let early = log_object(&event_loop, "early");
        let late = log_object(&event_loop, "late");

        signal.connect(&early, |log, _, ()| log.push("hit".to_string()));
        signal.raise(&ctx, ());
        signal.connect(&late, |log, _, ()| log.push("hit".to_string()));

        assert_eq!(signal.raise_count(), 1);
        assert_eq!(early.call(&ctx, |log, _| log.len()).unwrap(), 1);
        assert_eq!(late.call(&ctx, |log, _| log.len()).unwrap(), 0);
    }

    #[test]
    fn test_disconnect_removes_listener() {
        let event_loop = EventLoop::new(ThreadId::next(), "sig");
        let signal: Signal = Signal::new("done");
        let a = log_object(&event_loop, "a");
        signal.connect(&a, |_, _, ()| {});
        signal.connect_fn(&a, Connection::Queued, |_, ()| {});

        assert_eq!(signal.listener_count(), 2);
        assert_eq!(signal.disconnect(a.id()), 2);
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn test_disposed_listener_is_skipped() {
        let event_loop = EventLoop::new(ThreadId::next(), "sig");
        let ctx = event_loop.context();
        let signal: Signal = Signal::new("done");
        let a = log_object(&event_loop, "a");
        let b = log_object(&event_loop, "b");
        signal.connect(&a, |_, _, ()| {});
        signal.connect(&b, |_, _, ()| {});

        a.dispose(&ctx).unwrap();
        let stop = event_loop.handle();
        ctx.defer(move |_| {
            stop.request_stop();
        })
        .unwrap();
        let handle = event_loop.handle();
        let runner = std::thread::spawn(move || event_loop.run());
        runner.join().unwrap();
        assert!(handle.is_closed());

        let deliveries = signal.raise(&Context::foreign(), ());
        assert!(deliveries.is_empty());
    }
}
