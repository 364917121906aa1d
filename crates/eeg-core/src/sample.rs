//! Sample: one timestamped multi-channel EEG reading

use serde::{Deserialize, Serialize};
use crate::error::{RecorderError, RecorderResult};

/// Electrode labels of a Muse 2 headband, in stream order
pub const MUSE_CHANNEL_LABELS: [&str; 5] = ["TP9", "AF7", "AF8", "TP10", "Right AUX"];

/// Name of the timestamp column in data files
pub const TIMESTAMP_COLUMN: &str = "timestamps";

/// One reading across all channels at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Device clock timestamp in seconds
    pub timestamp: f64,
    /// Channel readings in stream order
    pub channels: Vec<f32>,
}

impl Sample {
    pub fn new(timestamp: f64, channels: Vec<f32>) -> Self {
        Self { timestamp, channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Check the reading against an expected channel layout
    pub fn validate(&self, expected_channels: usize) -> RecorderResult<()> {
        if self.channels.len() != expected_channels {
            return Err(RecorderError::ChannelMismatch {
                expected: expected_channels,
                actual: self.channels.len(),
            });
        }
        Ok(())
    }

    /// Row as written to a data file: timestamp followed by channel values.
    /// Whole numbers keep their trailing `.0` so every column reads as float.
    pub fn to_record(&self) -> Vec<String> {
        let mut record = Vec::with_capacity(self.channels.len() + 1);
        record.push(format!("{:?}", self.timestamp));
        record.extend(self.channels.iter().map(|value| format!("{:?}", value)));
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let sample = Sample::new(12.5, vec![1.0, 2.0, 3.0, 4.0, 5.5]);
        assert_eq!(sample.to_record(), vec!["12.5", "1.0", "2.0", "3.0", "4.0", "5.5"]);
    }

    #[test]
    fn test_validate_channel_count() {
        let sample = Sample::new(0.0, vec![0.0; 4]);
        assert!(sample.validate(4).is_ok());
        assert!(matches!(
            sample.validate(MUSE_CHANNEL_LABELS.len()),
            Err(RecorderError::ChannelMismatch { expected: 5, actual: 4 })
        ));
    }
}
