//! Process configuration (`zampy_config.yml`).
//!
//! ```yaml
//! working_directory: ~/zampy
//! cds:
//!   url: https://cds.climate.copernicus.eu/api/v2
//!   key: "12345:abcdef"
//! download:
//!   max_attempts: 3
//! na_threshold: 0.1
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZampyError};

/// URL and API key of one remote archive (`cds`, `ads`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveCredentials {
    pub url: String,
    #[serde(default)]
    pub key: Option<String>,
}

/// Retry and concurrency settings for the Download Coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Attempts per artifact, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Downloads in flight per dataset pipeline.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    2_000
}

fn default_max_backoff_ms() -> u64 {
    120_000
}

fn default_max_concurrent() -> usize {
    4
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_na_threshold() -> f64 {
    0.1
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_concurrent: default_max_concurrent(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl DownloadSettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Parsed process configuration handed to the Orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZampyConfig {
    pub working_directory: PathBuf,
    #[serde(default)]
    pub download: DownloadSettings,
    /// Largest NaN fraction a regridding bin may contain and still get a
    /// value.
    #[serde(default = "default_na_threshold")]
    pub na_threshold: f64,
    /// Every other top-level key is an archive entry.
    #[serde(flatten)]
    pub archives: BTreeMap<String, ArchiveCredentials>,
}

impl ZampyConfig {
    /// Configuration with defaults and no archive credentials.
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            download: DownloadSettings::default(),
            na_threshold: default_na_threshold(),
            archives: BTreeMap::new(),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: ZampyConfig = serde_yaml::from_str(text)
            .map_err(|e| ZampyError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ZampyError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.working_directory.as_os_str().is_empty() {
            return Err(ZampyError::InvalidConfig(
                "working_directory must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.na_threshold) {
            return Err(ZampyError::InvalidConfig(format!(
                "na_threshold {} is outside [0, 1]",
                self.na_threshold
            )));
        }
        if self.download.max_attempts == 0 {
            return Err(ZampyError::InvalidConfig(
                "download.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.download.max_concurrent == 0 {
            return Err(ZampyError::InvalidConfig(
                "download.max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Credentials for an archive, e.g. `cds`.
    pub fn archive(&self, name: &str) -> Option<&ArchiveCredentials> {
        self.archives.get(name)
    }

    pub fn with_archive(mut self, name: impl Into<String>, credentials: ArchiveCredentials) -> Self {
        self.archives.insert(name.into(), credentials);
        self
    }
}
