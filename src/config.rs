//! Scheduler configuration loaded from `plate-scheduler.toml`, plus the JSON
//! robot setup list.
//!
//! Keys missing from the file fall back to defaults. The environment
//! variable `PLATE_SCHEDULER_INPUT_DIR` takes precedence over `input_dir`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SchedulerError};

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "plate-scheduler.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Directory watched for admission documents.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Checkpoint file rewritten on every step transition.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// JSON array of `{name, host, port}` entries.
    #[serde(default = "default_robot_setup_file")]
    pub robot_setup_file: PathBuf,

    /// Name of the simulated transporter, also the prefix of its task labels.
    #[serde(default = "default_transporter_name")]
    pub transporter_name: String,

    #[serde(default = "default_transporter_latency_ms")]
    pub transporter_latency_ms: u64,

    /// Interval shared by every wait loop.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on how long shutdown waits for drivers to exit.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Log to this file instead of stderr when set.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("input")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("state.json")
}

fn default_robot_setup_file() -> PathBuf {
    PathBuf::from("setup_universal_robot.json")
}

fn default_transporter_name() -> String {
    "EM".to_string()
}

fn default_transporter_latency_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_shutdown_grace_ms() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            state_file: default_state_file(),
            robot_setup_file: default_robot_setup_file(),
            transporter_name: default_transporter_name(),
            transporter_latency_ms: default_transporter_latency_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            log_file: None,
        }
    }
}

impl SchedulerConfig {
    /// Loads the config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<SchedulerConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(dir) = std::env::var("PLATE_SCHEDULER_INPUT_DIR")
            && !dir.is_empty()
        {
            config.input_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.transporter_name.trim().is_empty() {
            return Err(SchedulerError::Config(
                "transporter_name must not be empty".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(SchedulerError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn transporter_latency(&self) -> Duration {
        Duration::from_millis(self.transporter_latency_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// One socket-backed robot to instantiate at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RobotSetup {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// Reads the robot setup list. Unlike the state file, its absence is an error.
pub fn load_robot_setup(path: &Path) -> Result<Vec<RobotSetup>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        SchedulerError::Config(format!(
            "cannot read robot setup file {}: {e}",
            path.display()
        ))
    })?;
    let setup: Vec<RobotSetup> = serde_json::from_str(&contents)?;
    if setup.is_empty() {
        return Err(SchedulerError::Config(format!(
            "robot setup file {} lists no robots",
            path.display()
        )));
    }
    Ok(setup)
}
