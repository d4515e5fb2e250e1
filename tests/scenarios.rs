//! Demo scenario integration tests
//!
//! Runs every scenario with short timings and checks what ran, where, and in
//! which order.

use std::time::Duration;

use tether::DispatcherConfig;
use tether::scenario::{self, Journal, Scenario, ScenarioSettings};

fn fast_settings() -> ScenarioSettings {
    ScenarioSettings {
        work: Duration::from_millis(60),
        steps: 3,
        step: Duration::from_millis(20),
        halt_after: Duration::from_millis(150),
    }
}

fn fast_config() -> DispatcherConfig {
    DispatcherConfig::default()
        .with_halt_poll(Duration::from_millis(25))
        .with_join_timeout(Duration::from_secs(5))
}

fn run(scenario: Scenario) -> Journal {
    scenario::run(scenario, &fast_settings(), fast_config()).unwrap()
}

/// Events in order, paired with the name of the thread that recorded them
fn trace(journal: &Journal) -> Vec<(String, String)> {
    journal
        .entries()
        .into_iter()
        .map(|e| (e.thread_name, e.event))
        .collect()
}

fn on(thread: &str, event: &str) -> (String, String) {
    (thread.to_string(), event.to_string())
}

fn assert_closed_last(journal: &Journal) {
    let entries = journal.entries();
    let last = entries.last().expect("journal is empty");
    assert_eq!(last.event, "window closed");
    assert_eq!(last.thread_name, "main");
    assert_eq!(entries.iter().filter(|e| e.event == "window closed").count(), 1);
}

/// Integration test: slow work on main holds back the queued tick
#[test]
fn test_blocking_scenario_runs_everything_on_main() {
    let journal = run(Scenario::Blocking);

    assert_eq!(
        trace(&journal),
        vec![
            on("main", "button clicked"),
            on("main", "inside at position 0"),
            on("main", "inside at position 1"),
            on("main", "inside at position 2"),
            on("main", "queued tick ran"),
            on("main", "window closed"),
        ]
    );
    let tick = journal.find("queued tick ran").unwrap();
    assert!(tick.at >= Duration::from_millis(60), "tick ran at {:?}", tick.at);
}

/// Integration test: an owned thread runs the body, then the window closes on finish
#[test]
fn test_thread_unit_scenario_runs_body_on_worker_thread() {
    let journal = run(Scenario::ThreadUnit);

    assert_eq!(
        trace(&journal),
        vec![
            on("main", "button clicked"),
            on("worker-thread", "run_it (starting)"),
            on("worker-thread", "mult_affinity (starting)"),
            on("worker-thread", "mult_affinity (exiting)"),
            on("worker-thread", "run_it (finished)"),
            on("main", "window closed"),
        ]
    );
}

/// Integration test: a bypassing call on main runs while the moved worker's thread is live
#[test]
fn test_moved_scenario_bypass_blocks_main_while_worker_runs() {
    let journal = run(Scenario::Moved);
    assert_closed_last(&journal);
    let entries = journal.entries();

    let worker_events: Vec<&str> = entries
        .iter()
        .filter(|e| e.thread_name == "worker-thread" && e.source == "worker")
        .map(|e| e.event.as_str())
        .collect();
    assert_eq!(
        worker_events,
        vec![
            "run_it (starting)",
            "mult_affinity (starting)",
            "mult_affinity (exiting)",
            "run_it (finished)"
        ]
    );

    // Main either ran the blocking call itself or waited on the run body and
    // then found the worker gone; in both cases main's loop was held.
    let main_bypass: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            e.thread_name == "main" && (e.event.starts_with("mult_affinity") || e.event.starts_with("bypass refused"))
        })
        .map(|(i, _)| i)
        .collect();
    let bypass_end = *main_bypass.last().expect("main never reached the bypassing call");

    let started = journal.position("thread started").unwrap();
    assert_eq!(entries[started].thread_name, "worker-thread");
    assert!(started < bypass_end, "worker thread started after main's call returned");

    let clicked = journal.find("button clicked").unwrap();
    assert!(entries[bypass_end].at - clicked.at >= Duration::from_millis(60));
}

/// Integration test: a signalled call to a busy worker waits for the run body
#[test]
fn test_queued_scenario_slot_runs_after_body() {
    let journal = run(Scenario::Queued);

    assert_eq!(
        trace(&journal),
        vec![
            on("main", "button clicked"),
            on("worker-thread", "run_it (starting)"),
            on("worker-thread", "run_it (finished)"),
            on("worker-thread", "mult_affinity"),
            on("main", "window closed"),
        ]
    );
}

/// Integration test: a slot on the owner-affine thread handle runs on main during the run body
#[test]
fn test_unit_slot_scenario_slot_runs_on_main_during_body() {
    let journal = run(Scenario::UnitSlot);
    assert_closed_last(&journal);

    let slot = journal.position("mult_affinity").unwrap();
    let finished = journal.position("run_it (finished)").unwrap();
    assert!(slot < finished);
    assert_eq!(journal.find("mult_affinity").unwrap().thread_name, "main");
    assert_eq!(journal.find("run_it (starting)").unwrap().thread_name, "worker-thread");
    assert_eq!(journal.find("run_it (finished)").unwrap().thread_name, "worker-thread");
    assert_eq!(journal.len(), 5);
}

/// Integration test: a halt pressed from another thread ends the polling body
#[test]
fn test_halt_scenario_stops_polling_worker() {
    let journal = run(Scenario::Halt);
    assert_closed_last(&journal);

    let started = journal.position("run (starting)").unwrap();
    let requested = journal.position("halt requested").unwrap();
    let finished = journal.position("run (finished after").unwrap();
    assert!(started < requested);
    assert!(requested < finished);

    assert_eq!(journal.find("halt requested").unwrap().thread_name, "foreign");
    assert_eq!(journal.find("run (finished after").unwrap().thread_name, "worker-thread");
    assert_eq!(journal.find("working (iteration 0)").unwrap().thread_name, "worker-thread");

    let iterations = journal
        .entries()
        .iter()
        .filter(|e| e.event.starts_with("working (iteration"))
        .count();
    assert!(iterations >= 2, "only {} iterations", iterations);
}

/// Integration test: every scenario ends with exactly one window close on main
#[test]
fn test_every_scenario_closes_window_last() {
    for scenario in Scenario::ALL {
        let journal = run(scenario);
        assert_closed_last(&journal);
        assert_eq!(journal.entries()[0].event, "button clicked", "{}", scenario);
    }
}
