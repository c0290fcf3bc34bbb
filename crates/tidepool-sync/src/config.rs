use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::Deserialize;
use tracing::warn;

const ENV_PREFIX: &str = "TIDEPOOL";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TidepoolConfig {
    /// Base URL of the resource API; `None` means tasks stay on disk.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub realtime_url: Option<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub log_path: Option<String>,
}

impl Default for TidepoolConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            realtime_url: None,
            data_dir: None,
            request_timeout_ms: default_request_timeout_ms(),
            log_path: None,
        }
    }
}

impl TidepoolConfig {
    /// Reads `TIDEPOOL__*` variables, falling back to defaults when they don't parse.
    pub fn from_env() -> Self {
        Self::load(environment()).unwrap_or_else(|err| {
            warn!(target = "tidepool::config", error = %err, "invalid configuration; using defaults");
            Self::default()
        })
    }

    pub fn load(source: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .map(TidepoolConfig::normalize)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Configured data directory, else `~/.tidepool`.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return PathBuf::from(dir);
        }
        BaseDirs::new()
            .map(|base| base.home_dir().join(".tidepool"))
            .unwrap_or_else(|| PathBuf::from(".tidepool"))
    }

    fn normalize(mut self) -> Self {
        self.api_url = Self::normalize_opt(self.api_url.take());
        self.realtime_url = Self::normalize_opt(self.realtime_url.take());
        self.data_dir = Self::normalize_opt(self.data_dir.take());
        self.log_path = Self::normalize_opt(self.log_path.take());
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX).separator("__")
}

fn default_request_timeout_ms() -> u64 {
    10_000
}
