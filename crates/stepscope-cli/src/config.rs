//! CLI configuration management.
//!
//! Loads from the platform config dir with environment-variable overrides.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Application-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the event/history endpoints.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Trail length (1..=10).
    #[serde(default = "default_trail_length")]
    pub trail_length: usize,

    /// Replay auto-advance interval in milliseconds.
    #[serde(default = "default_replay_interval_ms")]
    pub replay_interval_ms: u64,

    /// Safety-net / fallback poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum cached artifacts.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_base_url() -> String {
    "http://localhost:8800".to_string()
}

fn default_trail_length() -> usize {
    5
}

fn default_replay_interval_ms() -> u64 {
    600
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_cache_capacity() -> usize {
    40
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            trail_length: default_trail_length(),
            replay_interval_ms: default_replay_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from disk with environment overrides.
    pub fn load() -> Result<Self> {
        // Load .env if present (silently ignore when missing).
        let _ = dotenvy::dotenv();

        let mut config = if let Some(path) = Self::config_file_path() {
            if path.exists() {
                let contents = std::fs::read_to_string(&path)?;
                serde_json::from_str(&contents)?
            } else {
                Self::default()
            }
        } else {
            Self::default()
        };

        if let Ok(base_url) = std::env::var("STEPSCOPE_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(trail) = std::env::var("STEPSCOPE_TRAIL_LENGTH") {
            if let Ok(trail) = trail.parse() {
                config.trail_length = trail;
            }
        }

        Ok(config)
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(path) = Self::config_file_path() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(self)?;
            std::fs::write(&path, contents)?;
        }
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_file_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "stepscope", "stepscope")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Replay interval as a `Duration`.
    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms)
    }

    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "base_url" => Some(self.base_url.clone()),
            "trail_length" => Some(self.trail_length.to_string()),
            "replay_interval_ms" => Some(self.replay_interval_ms.to_string()),
            "poll_interval_ms" => Some(self.poll_interval_ms.to_string()),
            "cache_capacity" => Some(self.cache_capacity.to_string()),
            _ => None,
        }
    }

    /// Set a configuration value by key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "base_url" => self.base_url = value.to_string(),
            "trail_length" => {
                let parsed: usize = value.parse()?;
                if !(1..=10).contains(&parsed) {
                    bail!("trail_length must be between 1 and 10");
                }
                self.trail_length = parsed;
            }
            "replay_interval_ms" => self.replay_interval_ms = value.parse()?,
            "poll_interval_ms" => self.poll_interval_ms = value.parse()?,
            "cache_capacity" => self.cache_capacity = value.parse()?,
            _ => bail!("unknown config key: {key}"),
        }
        Ok(())
    }
}
