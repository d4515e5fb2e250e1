use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tether::dispatcher::DispatcherConfig;
use tether::scenario::ScenarioSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
    pub runtime: RuntimeConfig,
    pub demo: DemoConfig,
}

/// Dispatcher timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interval between halt flag checks in milliseconds.
    #[serde(rename = "halt-poll-ms")]
    pub halt_poll_ms: u64,

    /// How long shutdown waits for each thread in milliseconds.
    #[serde(rename = "join-timeout-ms")]
    pub join_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            halt_poll_ms: 2000,
            join_timeout_ms: 30_000,
        }
    }
}

/// Simulated work in the demo scenarios.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    #[serde(rename = "work-ms")]
    pub work_ms: u64,

    pub steps: u32,

    #[serde(rename = "step-ms")]
    pub step_ms: u64,

    #[serde(rename = "halt-after-ms")]
    pub halt_after_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            work_ms: 5000,
            steps: 10,
            step_ms: 1000,
            halt_after_ms: 6000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            runtime: RuntimeConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.halt_poll_ms == 0 {
            return Err(eyre!("runtime.halt-poll-ms must be greater than 0"));
        }
        if self.runtime.join_timeout_ms == 0 {
            return Err(eyre!("runtime.join-timeout-ms must be greater than 0"));
        }
        Ok(())
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::default()
            .with_halt_poll(Duration::from_millis(self.runtime.halt_poll_ms))
            .with_join_timeout(Duration::from_millis(self.runtime.join_timeout_ms))
    }

    pub fn scenario_settings(&self) -> ScenarioSettings {
        ScenarioSettings {
            work: Duration::from_millis(self.demo.work_ms),
            steps: self.demo.steps,
            step: Duration::from_millis(self.demo.step_ms),
            halt_after: Duration::from_millis(self.demo.halt_after_ms),
        }
    }
}
