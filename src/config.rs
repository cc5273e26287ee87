use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that overrides `api_base_url`.
pub const API_ENV_VAR: &str = "MODEL_CONSOLE_API";

/// Shortest accepted poll interval.
const MIN_POLL_MS: u64 = 1000;
const MIN_RECORDING_MS: u64 = 1000;

/// Top-level console configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL, e.g. "http://127.0.0.1:8000/api"
    pub api_base_url: String,
    /// Voice project used when none is given on the command line
    pub default_project: String,
    pub catalog_poll_ms: u64,
    pub training_poll_ms: u64,
    /// Hard cap on a single recording
    pub max_recording_ms: u64,
    /// How often captured audio is drained into a chunk
    pub chunk_interval_ms: u64,
    /// How many recent training jobs to request
    pub job_history_limit: u32,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000/api".into(),
            default_project: "default".into(),
            catalog_poll_ms: 4000,
            training_poll_ms: 5000,
            max_recording_ms: 60_000,
            chunk_interval_ms: 250,
            job_history_limit: 5,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Directory: ~/.config/model-console/
    fn dir() -> PathBuf {
        let mut p = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        p.push("model-console");
        p
    }

    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load from disk, returning defaults if file doesn't exist or is invalid.
    /// `MODEL_CONSOLE_API` wins over the stored base URL.
    pub fn load() -> Self {
        let path = Self::path();
        let mut config = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                log::warn!("Ignoring invalid config at {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        if let Ok(url) = std::env::var(API_ENV_VAR) {
            if !url.trim().is_empty() {
                config.api_base_url = url;
            }
        }
        config
    }

    /// Persist to disk.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let dir = Self::dir();
        fs::create_dir_all(&dir)?;
        let data = serde_json::to_string_pretty(self)?;
        fs::write(Self::path(), data)?;
        Ok(())
    }

    pub fn catalog_poll_interval(&self) -> Duration {
        Duration::from_millis(self.catalog_poll_ms.max(MIN_POLL_MS))
    }

    pub fn training_poll_interval(&self) -> Duration {
        Duration::from_millis(self.training_poll_ms.max(MIN_POLL_MS))
    }

    pub fn max_recording(&self) -> Duration {
        Duration::from_millis(self.max_recording_ms.max(MIN_RECORDING_MS))
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(10))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config: Config =
            serde_json::from_str(r#"{"api_base_url": "http://gpu-box:9000"}"#).unwrap();
        assert_eq!(config.api_base_url, "http://gpu-box:9000");
        assert_eq!(config.catalog_poll_interval(), Duration::from_millis(4000));
        assert_eq!(config.training_poll_interval(), Duration::from_millis(5000));
        assert_eq!(config.max_recording(), Duration::from_secs(60));
    }

    #[test]
    fn durations_have_floors() {
        let config = Config {
            catalog_poll_ms: 0,
            training_poll_ms: 5,
            max_recording_ms: 0,
            chunk_interval_ms: 0,
            request_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.catalog_poll_interval(), Duration::from_millis(1000));
        assert_eq!(config.training_poll_interval(), Duration::from_millis(1000));
        assert_eq!(config.max_recording(), Duration::from_millis(1000));
        assert_eq!(config.chunk_interval(), Duration::from_millis(10));
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
    }
}
