use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;
use tether::scenario::{self, Entry, Scenario};

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("tether.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Overrides from the `demo` subcommand, applied on top of the loaded config
struct DemoOverrides {
    work_ms: Option<u64>,
    step_ms: Option<u64>,
    steps: Option<u32>,
    poll_ms: Option<u64>,
    halt_after_ms: Option<u64>,
}

impl DemoOverrides {
    fn apply(&self, config: &Config) -> Config {
        let mut config = config.clone();
        if let Some(work_ms) = self.work_ms {
            config.demo.work_ms = work_ms;
        }
        if let Some(step_ms) = self.step_ms {
            config.demo.step_ms = step_ms;
        }
        if let Some(steps) = self.steps {
            config.demo.steps = steps;
        }
        if let Some(poll_ms) = self.poll_ms {
            config.runtime.halt_poll_ms = poll_ms;
        }
        if let Some(halt_after_ms) = self.halt_after_ms {
            config.demo.halt_after_ms = halt_after_ms;
        }
        config
    }
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Demo {
            scenario,
            work_ms,
            step_ms,
            steps,
            poll_ms,
            halt_after_ms,
        } => {
            let overrides = DemoOverrides {
                work_ms: *work_ms,
                step_ms: *step_ms,
                steps: *steps,
                poll_ms: *poll_ms,
                halt_after_ms: *halt_after_ms,
            };
            handle_demo_command(*scenario, &overrides.apply(config), cli.is_verbose())
        }
        Commands::List => handle_list_command(),
    }
}

fn handle_demo_command(scenario: Scenario, config: &Config, verbose: bool) -> Result<()> {
    config.validate()?;
    info!("Running scenario: {}", scenario);
    println!("{} {} - {}", "Scenario:".green(), scenario.name().bold(), scenario.description());
    if verbose {
        println!("  log-level: {}", config.log_level.as_deref().unwrap_or("default"));
        println!("  {:?}", config.runtime);
        println!("  {:?}", config.demo);
    }

    let journal = scenario::run(scenario, &config.scenario_settings(), config.dispatcher_config())
        .context(format!("Scenario {} failed", scenario))?;

    for entry in journal.entries() {
        println!("{}", paint(&entry));
    }

    let elapsed = journal
        .entries()
        .last()
        .map(|e| e.at)
        .unwrap_or(Duration::ZERO);
    println!(
        "{} {} entries in {:.3}s",
        "Done:".green(),
        journal.len(),
        elapsed.as_secs_f64()
    );
    Ok(())
}

fn paint(entry: &Entry) -> ColoredString {
    let line = entry.to_string();
    match entry.thread_name.as_str() {
        "main" => line.cyan(),
        "foreign" => line.yellow(),
        _ => line.green(),
    }
}

fn handle_list_command() -> Result<()> {
    info!("Listing scenarios");
    println!("{}", "Scenarios:".cyan());
    for scenario in Scenario::ALL {
        println!("  {:<12} {}", scenario.name().bold(), scenario.description());
    }
    Ok(())
}

fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
