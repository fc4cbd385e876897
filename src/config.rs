//! Configuration Management
//!
//! Handles persistent configuration storage for gkepool.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TIMEOUT_MINS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// User configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default project ID
    #[serde(default)]
    pub project: Option<String>,
    /// Default location (region or zone)
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_timeout_mins")]
    pub create_timeout_mins: u64,
    #[serde(default = "default_timeout_mins")]
    pub update_timeout_mins: u64,
    #[serde(default = "default_timeout_mins")]
    pub delete_timeout_mins: u64,
    /// First delay between polls; later delays double up to five times this
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Container API base URL override
    #[serde(default)]
    pub api_endpoint: Option<String>,
}

fn default_timeout_mins() -> u64 {
    DEFAULT_TIMEOUT_MINS
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: None,
            location: None,
            create_timeout_mins: DEFAULT_TIMEOUT_MINS,
            update_timeout_mins: DEFAULT_TIMEOUT_MINS,
            delete_timeout_mins: DEFAULT_TIMEOUT_MINS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            api_endpoint: None,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gkepool").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {:?}: {:#}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse config")
    }

    /// Get effective project (CLI > config > gcloud default)
    pub fn effective_project(&self, cli: Option<&str>) -> Option<String> {
        cli.map(str::to_string)
            .or_else(|| self.project.clone())
            .or_else(crate::gcp::auth::get_default_project)
            .filter(|p| crate::gcp::auth::validate_project_id(p))
    }

    /// Get effective location (CLI > config > gcloud default)
    pub fn effective_location(&self, cli: Option<&str>) -> Option<String> {
        cli.map(str::to_string)
            .or_else(|| self.location.clone())
            .or_else(crate::gcp::auth::get_default_location)
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_mins.saturating_mul(60))
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.update_timeout_mins.saturating_mul(60))
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_mins.saturating_mul(60))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
