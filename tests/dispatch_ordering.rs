//! Dispatch ordering integration tests
//!
//! Tests FIFO delivery onto an affinity thread, same-thread direct calls, and
//! signal fan-out to listeners on different threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tether::{BypassAffinity, Connection, Context, Delivery, Dispatcher, DispatcherConfig, Result, Signal, ThreadId};

const LIMIT: Option<Duration> = Some(Duration::from_secs(10));

fn dispatcher() -> Dispatcher {
    Dispatcher::new(
        DispatcherConfig::default()
            .with_halt_poll(Duration::from_millis(10))
            .with_join_timeout(Duration::from_secs(10)),
    )
}

/// Integration test: calls from many threads run one at a time, in enqueue order
#[test]
fn test_calls_from_many_threads_run_in_enqueue_order() -> Result<()> {
    let dispatcher = dispatcher();
    let main = dispatcher.main_context();
    let host = dispatcher.spawn_thread(&main, "host");
    let target = dispatcher.create(&main, "counter", Vec::<(usize, usize)>::new());
    dispatcher.move_to_thread(&main, &target, &host)?;
    host.start()?;

    let busy = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));
    let seqs = Arc::new(Mutex::new(HashMap::new()));

    let senders: Vec<_> = (0..4)
        .map(|sender| {
            let target = target.clone();
            let busy = busy.clone();
            let overlapped = overlapped.clone();
            let seqs = seqs.clone();
            thread::spawn(move || {
                let caller = Context::foreign();
                for i in 0..50 {
                    let busy = busy.clone();
                    let overlapped = overlapped.clone();
                    let delivery = target
                        .invoke(&caller, move |log, _| {
                            if busy.swap(true, Ordering::AcqRel) {
                                overlapped.store(true, Ordering::Release);
                            }
                            log.push((sender, i));
                            busy.store(false, Ordering::Release);
                        })
                        .unwrap();
                    match delivery {
                        Delivery::Queued { seq } => {
                            seqs.lock().unwrap().insert((sender, i), seq);
                        }
                        Delivery::Direct => panic!("foreign call ran in place"),
                    }
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    host.request_quit();
    host.wait(&main, LIMIT)?;

    let log = target.call_bypassing_affinity(&main, BypassAffinity::acknowledged(), |log, _| log.clone())?;
    assert_eq!(log.len(), 200);
    assert!(!overlapped.load(Ordering::Acquire));

    let seqs = seqs.lock().unwrap();
    let executed: Vec<u64> = log.iter().map(|key| seqs[key]).collect();
    assert!(executed.windows(2).all(|w| w[0] < w[1]), "execution order differs from enqueue order");

    for sender in 0..4 {
        let order: Vec<usize> = log.iter().filter(|e| e.0 == sender).map(|e| e.1).collect();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }
    Ok(())
}

/// Integration test: a same-thread call runs before returning, ahead of queued work
#[test]
fn test_same_thread_call_is_direct() -> Result<()> {
    let dispatcher = dispatcher();
    let main = dispatcher.main_context();
    let host = dispatcher.spawn_thread(&main, "host");
    let first = dispatcher.create(&main, "first", ());
    let second = dispatcher.create(&main, "second", 0u32);
    dispatcher.move_to_thread(&main, &first, &host)?;
    dispatcher.move_to_thread(&main, &second, &host)?;

    let log = Arc::new(Mutex::new(Vec::new()));

    let inner_log = log.clone();
    let peer = second.clone();
    first.invoke(&main, move |_, ctx| {
        let delivery = peer.invoke(ctx, |n, _| *n += 1).unwrap();
        let value = peer.call(ctx, |n, _| *n).unwrap();
        inner_log.lock().unwrap().push(format!("direct:{:?}:{}", delivery, value));
    })?;
    let later_log = log.clone();
    first.invoke(&main, move |_, _| later_log.lock().unwrap().push("queued".to_string()))?;

    host.start()?;
    host.request_quit();
    host.wait(&main, LIMIT)?;

    assert_eq!(*log.lock().unwrap(), vec!["direct:Direct:1", "queued"]);
    Ok(())
}

/// Integration test: a raise reaches every listener once, on each listener's own thread
#[test]
fn test_signal_reaches_each_listener_on_its_thread() -> Result<()> {
    let dispatcher = dispatcher();
    let main = dispatcher.main_context();
    let left = dispatcher.spawn_thread(&main, "left");
    let right = dispatcher.spawn_thread(&main, "right");

    let seen: Arc<Mutex<Vec<(String, ThreadId)>>> = Arc::new(Mutex::new(Vec::new()));
    let signal: Signal<u32> = Signal::new("work.done");

    let mut expected = Vec::new();
    for (label, thread) in [("a", &left), ("b", &left), ("c", &right)] {
        let object = dispatcher.create(&main, label, label.to_string());
        dispatcher.move_to_thread(&main, &object, thread)?;
        let seen = seen.clone();
        dispatcher.on_completion(&signal, &object, move |name, ctx, n| {
            assert_eq!(n, 7);
            seen.lock().unwrap().push((name.clone(), ctx.thread()));
        });
        expected.push((label.to_string(), thread.id()));
    }

    left.start()?;
    right.start()?;
    let deliveries = signal.raise(&Context::foreign(), 7);
    assert_eq!(deliveries.len(), 3);
    assert!(deliveries.iter().all(|d| d.is_queued()));

    // Registered after the raise: must not be reached by it.
    let late = dispatcher.create(&main, "late", ());
    let late_seen = seen.clone();
    signal.connect_fn(&late, Connection::Auto, move |ctx, _| {
        late_seen.lock().unwrap().push(("late".to_string(), ctx.thread()));
    });

    dispatcher.shutdown(&main)?;

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    expected.sort();
    assert_eq!(seen, expected);
    Ok(())
}

/// Integration test: listeners sharing a thread run in registration order
#[test]
fn test_same_thread_listeners_run_in_registration_order() -> Result<()> {
    let dispatcher = dispatcher();
    let main = dispatcher.main_context();
    let host = dispatcher.spawn_thread(&main, "host");
    let order = Arc::new(Mutex::new(Vec::new()));
    let signal: Signal = Signal::new("tick");

    for label in ["one", "two", "three"] {
        let object = dispatcher.create(&main, label, label);
        dispatcher.move_to_thread(&main, &object, &host)?;
        let order = order.clone();
        signal.connect(&object, move |name, _, ()| order.lock().unwrap().push(*name));
    }

    signal.raise(&main, ());
    host.start()?;
    dispatcher.shutdown(&main)?;

    assert_eq!(*order.lock().unwrap(), vec!["one", "two", "three"]);
    Ok(())
}
