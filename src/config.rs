//! Application configuration.
//!
//! Layers, lowest priority first: built-in defaults, the TOML config file,
//! `TAPEWATCH_*` environment variables, command line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tapewatch/config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the backup server API.
    pub server: String,
    /// Node name used in task paths.
    pub node: String,
    pub device_poll_interval_ms: u64,
    pub status_poll_interval_ms: u64,
    pub task_poll_interval_ms: u64,
    /// Rows shown by the task widget and `tasks --all`.
    pub task_list_limit: usize,
    pub request_timeout_secs: u64,
    /// The server usually runs with a self-signed certificate.
    pub accept_invalid_certs: bool,
    /// Use the in-process simulated backend instead of `server`.
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: "https://localhost:8007".to_string(),
            node: "localhost".to_string(),
            device_poll_interval_ms: 5000,
            status_poll_interval_ms: 2000,
            task_poll_interval_ms: 1000,
            task_list_limit: 20,
            request_timeout_secs: 10,
            accept_invalid_certs: false,
            simulation: false,
            verbose: false,
            json_logs: false,
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file location.
    pub fn new<T: Serialize>(overrides: Option<&T>) -> Result<Self> {
        Self::load(Path::new(DEFAULT_CONFIG_PATH), overrides)
    }

    /// Load configuration from `path`. A missing file is not an error.
    pub fn load<T: Serialize>(path: &Path, overrides: Option<&T>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("TAPEWATCH_"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.device_poll_interval_ms == 0
            || self.status_poll_interval_ms == 0
            || self.task_poll_interval_ms == 0
        {
            anyhow::bail!("poll intervals must be greater than zero");
        }
        if !self.simulation && !self.server.starts_with("http") {
            anyhow::bail!("server must be an http(s) URL, got '{}'", self.server);
        }
        Ok(())
    }

    /// Write this configuration as TOML, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn device_poll_interval(&self) -> Duration {
        Duration::from_millis(self.device_poll_interval_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
