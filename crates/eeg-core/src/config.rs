//! Recorder configuration

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{RecorderError, RecorderResult};
use crate::sample::{MUSE_CHANNEL_LABELS, TIMESTAMP_COLUMN};
use crate::segment::{SegmentPlan, SegmentSpec};

/// File name looked up in the working directory at startup
pub const CONFIG_FILE_NAME: &str = "eeg-recorder.json";

/// Which device backend feeds the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    /// Built-in simulated headband
    Simulated,
    /// Lab Streaming Layer (requires the `lsl` feature)
    Lsl,
}

/// Top-level recorder configuration
///
/// Every field has a default, so a config file only needs the values it
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Directory receiving data and duration files
    pub output_dir: PathBuf,
    /// Stream type passed to discovery
    pub stream_type: String,
    /// Device name shown in the status line
    pub device_name: String,
    /// Discovery polling period (ms)
    pub poll_interval_ms: u64,
    /// Upper bound for one blocking sample pull (ms)
    pub pull_timeout_ms: u64,
    /// Channel column names, in stream order
    pub channel_labels: Vec<String>,
    /// Ordered recording protocol
    pub segments: Vec<SegmentSpec>,
    pub backend: DeviceBackend,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            stream_type: "EEG".to_string(),
            device_name: "Muse 2".to_string(),
            poll_interval_ms: 1000,
            pull_timeout_ms: 250,
            channel_labels: MUSE_CHANNEL_LABELS.iter().map(|s| s.to_string()).collect(),
            segments: SegmentSpec::default_protocol(),
            backend: DeviceBackend::Simulated,
        }
    }
}

impl RecorderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    /// Header row of segment data files
    pub fn csv_header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.channel_labels.len() + 1);
        header.push(TIMESTAMP_COLUMN.to_string());
        header.extend(self.channel_labels.iter().cloned());
        header
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> RecorderResult<()> {
        if self.stream_type.trim().is_empty() {
            return Err(RecorderError::Configuration {
                message: "stream_type must not be empty".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(RecorderError::Configuration {
                message: "poll_interval_ms must be greater than 0".to_string(),
            });
        }
        if self.pull_timeout_ms == 0 {
            return Err(RecorderError::Configuration {
                message: "pull_timeout_ms must be greater than 0".to_string(),
            });
        }
        if self.channel_labels.is_empty() {
            return Err(RecorderError::Configuration {
                message: "at least one channel label is required".to_string(),
            });
        }
        SegmentPlan::new(self.segments.clone())?;
        Ok(())
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> RecorderResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> RecorderResult<Self> {
        let config: RecorderConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file
    pub fn load(path: &Path) -> RecorderResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| RecorderError::Configuration {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_json(&json)
    }

    /// Read `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> RecorderResult<Self> {
        if path.exists() {
            tracing::info!("Loading configuration from {}", path.display());
            Self::load(path)
        } else {
            tracing::debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}
