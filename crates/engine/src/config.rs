//! Engine configuration file.
//!
//! The file is optional JSON; every field has a default. The location is
//! `$STEPFLOW_CONFIG_PATH` when set, otherwise `<config dir>/stepflow/config.json`.

use std::{
    env,
    fs::{self, create_dir_all},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use stepflow_util::{expand_tilde, parse_duration};

pub const CONFIG_PATH_ENV: &str = "STEPFLOW_CONFIG_PATH";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Iteration bound given to new `control.while` commands.
    pub default_max_iterations: u32,
    /// Default poll interval for new `time.wait_until` commands.
    pub wait_until_poll_interval: String,
    /// Default timeout for new `time.wait_until` commands.
    pub wait_until_timeout: String,
    /// Number of run log lines kept by in-memory loggers.
    pub log_buffer_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_iterations: 1000,
            wait_until_poll_interval: "250ms".into(),
            wait_until_timeout: "30s".into(),
            log_buffer_capacity: 500,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.wait_until_poll_interval)
            .ok()
            .filter(|duration| !duration.is_zero())
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    pub fn wait_timeout(&self) -> Duration {
        parse_duration(&self.wait_until_timeout)
            .ok()
            .filter(|duration| !duration.is_zero())
            .unwrap_or(DEFAULT_WAIT_TIMEOUT)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_max_iterations == 0 {
            bail!("default_max_iterations must be at least 1");
        }
        if self.log_buffer_capacity == 0 {
            bail!("log_buffer_capacity must be at least 1");
        }
        for (field, value) in [
            ("wait_until_poll_interval", &self.wait_until_poll_interval),
            ("wait_until_timeout", &self.wait_until_timeout),
        ] {
            let duration = parse_duration(value).with_context(|| format!("invalid {field}"))?;
            if duration.is_zero() {
                bail!("{field} must be greater than zero");
            }
        }
        Ok(())
    }
}

/// Returns the default path for the engine configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("stepflow").join("config.json")
}

/// Loads configuration from the default path.
pub fn load_config() -> Result<EngineConfig> {
    load_config_from_path(&default_config_path())
}

/// Loads configuration from `path`, falling back to defaults when the file does not exist.
pub fn load_config_from_path(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let config: EngineConfig = serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

pub fn save_config_to_path(config: &EngineConfig, path: &Path) -> Result<()> {
    if let Some(parent_directory) = path.parent() {
        create_dir_all(parent_directory)?;
    }
    fs::write(path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}
