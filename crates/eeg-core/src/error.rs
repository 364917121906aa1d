//! Error handling for the EEG recorder
//!
//! One error type covers device discovery, sample streaming, session state
//! transitions and file output.

use core::fmt;
use std::path::PathBuf;

/// Result type alias for recorder operations
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Error type for all recorder operations
#[derive(Debug)]
#[non_exhaustive]
pub enum RecorderError {
    /// Stream discovery failed
    Discovery {
        /// Description of the discovery failure
        reason: String,
    },

    /// A resolved stream could not be opened or stopped delivering samples
    Stream {
        /// Description of the stream failure
        reason: String,
    },

    /// Sample does not match the configured channel layout
    ChannelMismatch {
        /// Channels expected per sample
        expected: usize,
        /// Channels actually received
        actual: usize,
    },

    /// Segment key is not part of the configured plan
    UnknownSegment {
        /// Requested segment key
        key: String,
    },

    /// Segment exists but cannot be toggled right now
    SegmentUnavailable {
        /// Requested segment key
        key: String,
        /// Why the segment is not available
        reason: &'static str,
    },

    /// Participant identifier is empty after trimming
    MissingParticipant,

    /// Writing a data or summary file failed
    Persistence {
        /// File that was being written
        path: PathBuf,
        /// Underlying error description
        reason: String,
    },

    /// Configuration could not be read or parsed
    Configuration {
        /// Description of the configuration issue
        message: String,
    },

    /// Controller did not accept an operator request
    ControllerUnavailable {
        /// Why the request was refused
        reason: String,
    },
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::Discovery { reason } => {
                write!(f, "Stream discovery failed: {}", reason)
            }
            RecorderError::Stream { reason } => {
                write!(f, "Stream error: {}", reason)
            }
            RecorderError::ChannelMismatch { expected, actual } => {
                write!(f, "Channel mismatch: expected {} channels, got {}",
                       expected, actual)
            }
            RecorderError::UnknownSegment { key } => {
                write!(f, "Unknown segment: {}", key)
            }
            RecorderError::SegmentUnavailable { key, reason } => {
                write!(f, "Segment {} unavailable: {}", key, reason)
            }
            RecorderError::MissingParticipant => {
                write!(f, "Participant ID is required")
            }
            RecorderError::Persistence { path, reason } => {
                write!(f, "Failed to write {}: {}", path.display(), reason)
            }
            RecorderError::Configuration { message } => {
                write!(f, "Configuration error: {}", message)
            }
            RecorderError::ControllerUnavailable { reason } => {
                write!(f, "Recorder controller unavailable: {}", reason)
            }
        }
    }
}

impl std::error::Error for RecorderError {}

impl From<serde_json::Error> for RecorderError {
    fn from(err: serde_json::Error) -> Self {
        RecorderError::Configuration {
            message: err.to_string(),
        }
    }
}

impl RecorderError {
    /// Wrap a file write failure with the path it concerned
    pub fn persistence(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        RecorderError::Persistence {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = RecorderError::ChannelMismatch {
            expected: 5,
            actual: 4,
        };
        let display = format!("{}", error);
        assert!(display.contains("Channel mismatch"));
        assert!(display.contains('5'));
        assert!(display.contains('4'));
    }

    #[test]
    fn test_persistence_error_names_file() {
        let error = RecorderError::persistence("P01_EC.csv", "disk full");
        let display = error.to_string();
        assert!(display.contains("P01_EC.csv"));
        assert!(display.contains("disk full"));
    }
}
