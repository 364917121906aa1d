//! Recording segments of the experiment protocol

use serde::{Deserialize, Serialize};
use crate::error::{RecorderError, RecorderResult};
use crate::persistence::is_unsafe_file_char;

/// Label shown on a segment control while it is recording
pub const STOP_LABEL: &str = "Stop Recording";

/// Declared slot in the protocol: a file-safe key plus the operator-facing label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpec {
    /// Key used in file names and in the duration summary
    pub key: String,
    /// Button label while idle
    pub label: String,
}

impl SegmentSpec {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }

    /// Eyes-closed, eyes-open and three personality-survey segments
    pub fn default_protocol() -> Vec<SegmentSpec> {
        vec![
            SegmentSpec::new("EC", "Record Eyes Closed"),
            SegmentSpec::new("EO", "Record Eyes Opened"),
            SegmentSpec::new("Personality1", "Record Personality 1"),
            SegmentSpec::new("Personality2", "Record Personality 2"),
            SegmentSpec::new("Personality3", "Record Personality 3"),
        ]
    }
}

/// Fixed, ordered sequence of segments
///
/// Segments become available one after another: the cursor points at the
/// first segment that has not been completed yet.
#[derive(Debug, Clone)]
pub struct SegmentPlan {
    specs: Vec<SegmentSpec>,
    completed: Vec<bool>,
}

impl SegmentPlan {
    /// Build a plan, rejecting empty plans, empty keys and duplicate keys
    pub fn new(specs: Vec<SegmentSpec>) -> RecorderResult<Self> {
        if specs.is_empty() {
            return Err(RecorderError::Configuration {
                message: "at least one segment is required".to_string(),
            });
        }

        for (i, spec) in specs.iter().enumerate() {
            if spec.key.trim().is_empty() {
                return Err(RecorderError::Configuration {
                    message: format!("segment {} has an empty key", i),
                });
            }
            // Keys become part of file names
            if spec.key.chars().any(is_unsafe_file_char) {
                return Err(RecorderError::Configuration {
                    message: format!("segment key {:?} cannot be used in a file name", spec.key),
                });
            }
            if specs[..i].iter().any(|other| other.key == spec.key) {
                return Err(RecorderError::Configuration {
                    message: format!("duplicate segment key {}", spec.key),
                });
            }
        }

        let completed = vec![false; specs.len()];
        Ok(Self { specs, completed })
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> &[SegmentSpec] {
        &self.specs
    }

    /// Position of a key in the declared order
    pub fn index_of(&self, key: &str) -> RecorderResult<usize> {
        self.specs
            .iter()
            .position(|spec| spec.key == key)
            .ok_or_else(|| RecorderError::UnknownSegment { key: key.to_string() })
    }

    /// Index of the next segment to record, `None` once all are done
    pub fn cursor(&self) -> Option<usize> {
        self.completed.iter().position(|done| !done)
    }

    pub fn is_completed(&self, index: usize) -> bool {
        self.completed.get(index).copied().unwrap_or(false)
    }

    pub fn mark_completed(&mut self, index: usize) {
        if let Some(done) = self.completed.get_mut(index) {
            *done = true;
        }
    }

    pub fn reopen(&mut self, index: usize) {
        if let Some(done) = self.completed.get_mut(index) {
            *done = false;
        }
    }
}

/// Display view of one segment control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentView {
    pub key: String,
    /// Current button caption
    pub label: String,
    pub enabled: bool,
    pub recording: bool,
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_protocol_order() {
        let plan = SegmentPlan::new(SegmentSpec::default_protocol()).unwrap();
        let keys: Vec<_> = plan.specs().iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["EC", "EO", "Personality1", "Personality2", "Personality3"]);
        assert_eq!(plan.cursor(), Some(0));
    }

    #[test]
    fn test_cursor_advances_with_completion() {
        let mut plan = SegmentPlan::new(SegmentSpec::default_protocol()).unwrap();
        plan.mark_completed(0);
        assert_eq!(plan.cursor(), Some(1));
        for i in 1..plan.len() {
            plan.mark_completed(i);
        }
        assert_eq!(plan.cursor(), None);
    }

    #[test]
    fn test_rejects_bad_plans() {
        assert!(SegmentPlan::new(Vec::new()).is_err());
        assert!(SegmentPlan::new(vec![SegmentSpec::new(" ", "Blank")]).is_err());
        assert!(SegmentPlan::new(vec![
            SegmentSpec::new("EC", "One"),
            SegmentSpec::new("EC", "Two"),
        ]).is_err());
    }

    #[test]
    fn test_rejects_keys_unfit_for_file_names() {
        for key in ["a/b", "a\\b", "EC:1", "E?", "tab\t"] {
            let err = SegmentPlan::new(vec![SegmentSpec::new(key, "Bad")]).unwrap_err();
            assert!(matches!(err, RecorderError::Configuration { .. }), "{} accepted", key);
        }
        assert!(SegmentPlan::new(vec![SegmentSpec::new("Eyes-Closed_2", "Fine")]).is_ok());
    }
}
