//! Demo scenarios
//!
//! Six small programs that exercise the runtime the way a windowed
//! application would: a window on main, a button press that kicks off work,
//! and teardown that ends with the window closing. Output goes to a
//! [`Journal`] instead of a screen.

pub mod journal;
pub mod window;

pub use journal::{Entry, Journal};
pub use window::Window;

use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::affinity::{Affine, BypassAffinity, Connection};
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::error::Result;
use crate::runtime::Context;
use crate::signal::Signal;
use crate::worker::{Placement, Worker};

/// The available scenarios, in teaching order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Blocking,
    ThreadUnit,
    Moved,
    Queued,
    UnitSlot,
    Halt,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::Blocking,
        Scenario::ThreadUnit,
        Scenario::Moved,
        Scenario::Queued,
        Scenario::UnitSlot,
        Scenario::Halt,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Blocking => "blocking",
            Scenario::ThreadUnit => "thread-unit",
            Scenario::Moved => "moved",
            Scenario::Queued => "queued",
            Scenario::UnitSlot => "unit-slot",
            Scenario::Halt => "halt",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::Blocking => "slow work runs on main and delays every queued call behind it",
            Scenario::ThreadUnit => "worker owns its thread; the window closes when the thread finishes",
            Scenario::Moved => "worker moved onto a thread and started; a bypassing call from main blocks main",
            Scenario::Queued => "worker moved onto a thread; a signalled call queues behind the run body",
            Scenario::UnitSlot => "worker owns its thread; a slot on the thread handle runs on main during the body",
            Scenario::Halt => "worker polls a halt flag that another thread sets",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Scenario::ALL
            .iter()
            .copied()
            .find(|scenario| scenario.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Scenario::ALL.iter().map(|s| s.name()).collect();
                format!("Unknown scenario: {} (expected one of: {})", s, names.join(", "))
            })
    }
}

/// Timings for the simulated work
#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    /// Length of each blocking work chunk
    pub work: Duration,
    /// Positions walked by the blocking scenario
    pub steps: u32,
    /// Sleep per position
    pub step: Duration,
    /// Delay before the halt button is pressed
    pub halt_after: Duration,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            work: Duration::from_millis(5000),
            steps: 10,
            step: Duration::from_millis(1000),
            halt_after: Duration::from_millis(6000),
        }
    }
}

/// State of the demo worker object
pub struct DemoWorker {
    journal: Journal,
    work: Duration,
}

impl DemoWorker {
    pub fn new(journal: &Journal, work: Duration) -> Self {
        Self {
            journal: journal.clone(),
            work,
        }
    }

    /// A long blocking chunk of work on whatever thread runs it
    pub fn mult_affinity(&mut self, ctx: &Context) {
        self.journal.record(ctx, "worker", "mult_affinity (starting)");
        std::thread::sleep(self.work);
        self.journal.record(ctx, "worker", "mult_affinity (exiting)");
    }

    /// The quick slot reached through a signal
    pub fn mult_affinity_slot(&mut self, ctx: &Context) {
        self.journal.record(ctx, "worker", "mult_affinity");
    }

    /// The run body: optionally a nested blocking call, then one more chunk of work
    pub fn run_it(&mut self, ctx: &Context, nested: bool) {
        self.journal.record(ctx, "worker", "run_it (starting)");
        if nested {
            self.mult_affinity(ctx);
        }
        std::thread::sleep(self.work);
        self.journal.record(ctx, "worker", "run_it (finished)");
    }
}

/// Run one scenario to completion on the calling thread, which becomes main
pub fn run(scenario: Scenario, settings: &ScenarioSettings, config: DispatcherConfig) -> Result<Journal> {
    info!(scenario = %scenario, ?settings, "running scenario");
    let dispatcher = Dispatcher::new(config);
    let ctx = dispatcher.main_context();
    let journal = Journal::new();
    let window = Window::open(&dispatcher, &journal);

    let button = match scenario {
        Scenario::Blocking => setup_blocking(&ctx, &window, settings),
        Scenario::ThreadUnit => setup_thread_unit(&dispatcher, &ctx, &journal, &window, settings),
        Scenario::Moved => setup_moved(&dispatcher, &ctx, &journal, &window, settings),
        Scenario::Queued => setup_queued(&dispatcher, &ctx, &journal, &window, settings),
        Scenario::UnitSlot => setup_unit_slot(&dispatcher, &ctx, &journal, &window, settings),
        Scenario::Halt => setup_halt(&dispatcher, &ctx, &journal, &window, settings),
    }?;

    let stats = dispatcher.exec()?;
    info!(scenario = %scenario, executed = stats.executed, failed = stats.failed, "main loop exited");

    if let Some(button) = button {
        if button.join().is_err() {
            warn!(scenario = %scenario, "button thread panicked");
        }
    }
    dispatcher.shutdown(&ctx)?;
    Ok(journal)
}

fn close_on_finish<T: Send + 'static>(dispatcher: &Dispatcher, worker: &Worker<T>, window: &Affine<Window>) {
    dispatcher.on_completion(worker.thread().finished(), window, |w, ctx, ()| w.close(ctx));
}

/// Queue a button press on main
fn click<F>(ctx: &Context, window: &Affine<Window>, press: F) -> Result<()>
where
    F: FnOnce(&mut Window, &Context) + Send + 'static,
{
    window.invoke_with(ctx, Connection::Queued, move |w, ctx| {
        w.journal().record(ctx, "window", "button clicked");
        press(w, ctx);
    })?;
    Ok(())
}

fn start_worker<T: Send + 'static>(worker: &Worker<T>, ctx: &Context) {
    if let Err(e) = worker.start(ctx) {
        warn!(object = %worker.object().id(), error = %e, "worker did not start");
    }
}

fn setup_blocking(
    ctx: &Context,
    window: &Affine<Window>,
    settings: &ScenarioSettings,
) -> Result<Option<JoinHandle<()>>> {
    let steps = settings.steps;
    let step = settings.step;
    click(ctx, window, move |w, ctx| {
        for x in 0..steps {
            w.journal().record(ctx, "window", format!("inside at position {}", x));
            std::thread::sleep(step);
        }
    })?;
    window.invoke_with(ctx, Connection::Queued, |w, ctx| {
        w.journal().record(ctx, "window", "queued tick ran");
        w.close(ctx);
    })?;
    Ok(None)
}

fn setup_thread_unit(
    dispatcher: &Dispatcher,
    ctx: &Context,
    journal: &Journal,
    window: &Affine<Window>,
    settings: &ScenarioSettings,
) -> Result<Option<JoinHandle<()>>> {
    let worker = dispatcher.spawn_worker(
        ctx,
        "worker",
        DemoWorker::new(journal, settings.work),
        Placement::OwnsThread,
        |w, ctx, _| w.run_it(ctx, true),
    )?;
    close_on_finish(dispatcher, &worker, window);

    click(ctx, window, move |_, ctx| start_worker(&worker, ctx))?;
    Ok(None)
}

fn setup_moved(
    dispatcher: &Dispatcher,
    ctx: &Context,
    journal: &Journal,
    window: &Affine<Window>,
    settings: &ScenarioSettings,
) -> Result<Option<JoinHandle<()>>> {
    let host = dispatcher.spawn_thread(ctx, "worker-thread");
    let worker = dispatcher.spawn_worker(
        ctx,
        "worker",
        DemoWorker::new(journal, settings.work),
        Placement::Borrows(Arc::clone(&host)),
        |w, ctx, _| w.run_it(ctx, true),
    )?;
    worker.wire_teardown();
    close_on_finish(dispatcher, &worker, window);

    let started = journal.clone();
    host.started().connect_fn(worker.object(), Connection::Auto, move |ctx, ()| {
        started.record(ctx, "thread", "thread started");
    });

    click(ctx, window, move |w, ctx| {
        start_worker(&worker, ctx);
        // Runs on main and holds main's loop for the whole call, including any
        // wait for the run body to release the worker.
        let bypass = worker
            .object()
            .call_bypassing_affinity(ctx, BypassAffinity::acknowledged(), |state, ctx| state.mult_affinity(ctx));
        if let Err(e) = bypass {
            w.journal().record(ctx, "window", format!("bypass refused: {}", e));
        }
    })?;
    Ok(None)
}

fn setup_queued(
    dispatcher: &Dispatcher,
    ctx: &Context,
    journal: &Journal,
    window: &Affine<Window>,
    settings: &ScenarioSettings,
) -> Result<Option<JoinHandle<()>>> {
    let host = dispatcher.spawn_thread(ctx, "worker-thread");
    let worker = dispatcher.spawn_worker(
        ctx,
        "worker",
        DemoWorker::new(journal, settings.work),
        Placement::Borrows(Arc::clone(&host)),
        |w, ctx, _| w.run_it(ctx, false),
    )?;
    worker.wire_teardown();
    close_on_finish(dispatcher, &worker, window);

    let custom: Arc<Signal> = Arc::new(Signal::new("window.custom"));
    dispatcher.on_completion(&custom, worker.object(), |w, ctx, ()| w.mult_affinity_slot(ctx));

    click(ctx, window, move |_, ctx| {
        start_worker(&worker, ctx);
        custom.raise(ctx, ());
    })?;
    Ok(None)
}

fn setup_unit_slot(
    dispatcher: &Dispatcher,
    ctx: &Context,
    journal: &Journal,
    window: &Affine<Window>,
    settings: &ScenarioSettings,
) -> Result<Option<JoinHandle<()>>> {
    let worker = dispatcher.spawn_worker(
        ctx,
        "worker",
        DemoWorker::new(journal, settings.work),
        Placement::OwnsThread,
        |w, ctx, _| w.run_it(ctx, false),
    )?;
    close_on_finish(dispatcher, &worker, window);

    // The slot lives on the thread handle, whose affinity is main.
    let custom: Arc<Signal> = Arc::new(Signal::new("window.custom"));
    let slot_journal = journal.clone();
    custom.connect_fn(&**worker.thread(), Connection::Auto, move |ctx, ()| {
        slot_journal.record(ctx, "thread", "mult_affinity");
    });

    click(ctx, window, move |_, ctx| {
        start_worker(&worker, ctx);
        custom.raise(ctx, ());
    })?;
    Ok(None)
}

fn setup_halt(
    dispatcher: &Dispatcher,
    ctx: &Context,
    journal: &Journal,
    window: &Affine<Window>,
    settings: &ScenarioSettings,
) -> Result<Option<JoinHandle<()>>> {
    let worker = dispatcher.spawn_worker(
        ctx,
        "worker",
        DemoWorker::new(journal, settings.work),
        Placement::OwnsThread,
        |w, ctx, halt| {
            w.journal.record(ctx, "worker", "run (starting)");
            let outcome = halt.poll(|i| {
                w.journal.record(ctx, "worker", format!("working (iteration {})", i));
                ControlFlow::Continue(())
            });
            w.journal.record(
                ctx,
                "worker",
                format!("run (finished after {} iterations)", outcome.iterations()),
            );
        },
    )?;
    close_on_finish(dispatcher, &worker, window);

    let starter = worker.clone();
    click(ctx, window, move |_, ctx| start_worker(&starter, ctx))?;

    let halt_after = settings.halt_after;
    let journal = journal.clone();
    let button = std::thread::Builder::new().name("button".to_string()).spawn(move || {
        std::thread::sleep(halt_after);
        journal.record(&Context::foreign(), "button", "halt requested");
        worker.request_halt();
    })?;
    Ok(Some(button))
}
