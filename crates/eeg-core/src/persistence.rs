//! Segment data files and the per-participant duration summary

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use crate::error::{RecorderError, RecorderResult};
use crate::sample::Sample;
use crate::session::Session;

/// Result of saving one segment
#[derive(Debug, Clone, PartialEq)]
pub struct SavedSegment {
    pub key: String,
    pub data_path: PathBuf,
    pub summary_path: PathBuf,
    /// Data rows written, header excluded
    pub rows: usize,
}

/// Writes `<participant>_<key>.csv` and `<participant>_duration.txt`
#[derive(Debug, Clone)]
pub struct SegmentWriter {
    output_dir: PathBuf,
    header: Vec<String>,
}

impl SegmentWriter {
    pub fn new(output_dir: impl Into<PathBuf>, header: Vec<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            header,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn set_output_dir(&mut self, output_dir: impl Into<PathBuf>) {
        self.output_dir = output_dir.into();
    }

    pub fn data_path(&self, participant_id: &str, key: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.csv", file_stem(participant_id), key))
    }

    pub fn summary_path(&self, participant_id: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_duration.txt", file_stem(participant_id)))
    }

    /// Write one segment's samples, replacing any earlier file for the same key.
    /// An empty buffer still produces a header-only file.
    pub fn write_segment(
        &self,
        participant_id: &str,
        key: &str,
        samples: &[Sample],
    ) -> RecorderResult<PathBuf> {
        self.ensure_output_dir()?;
        let path = self.data_path(participant_id, key);

        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| RecorderError::persistence(&path, e))?;
        writer
            .write_record(&self.header)
            .map_err(|e| RecorderError::persistence(&path, e))?;
        for sample in samples {
            writer
                .write_record(sample.to_record())
                .map_err(|e| RecorderError::persistence(&path, e))?;
        }
        writer.flush().map_err(|e| RecorderError::persistence(&path, e))?;

        debug!("Wrote {} rows to {}", samples.len(), path.display());
        Ok(path)
    }

    /// Rewrite the duration summary from the session's cumulative durations
    pub fn write_summary(&self, session: &Session) -> RecorderResult<PathBuf> {
        self.ensure_output_dir()?;
        let path = self.summary_path(session.participant_id());
        fs::write(&path, session.render_summary())
            .map_err(|e| RecorderError::persistence(&path, e))?;
        Ok(path)
    }

    /// Save a finished segment: data file first, then the summary
    pub fn save(
        &self,
        session: &Session,
        key: &str,
        samples: &[Sample],
    ) -> RecorderResult<SavedSegment> {
        let data_path = self.write_segment(session.participant_id(), key, samples)?;
        let summary_path = self.write_summary(session)?;

        info!("Saved segment {} ({} samples) to {}", key, samples.len(), data_path.display());
        Ok(SavedSegment {
            key: key.to_string(),
            data_path,
            summary_path,
            rows: samples.len(),
        })
    }

    fn ensure_output_dir(&self) -> RecorderResult<()> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| RecorderError::persistence(&self.output_dir, e))
    }
}

/// Path separators, characters Windows rejects in file names, and control characters
pub(crate) fn is_unsafe_file_char(c: char) -> bool {
    matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
}

/// Participant ID as used in file names; unsafe characters become `_`.
fn file_stem(participant_id: &str) -> String {
    participant_id
        .chars()
        .map(|c| if is_unsafe_file_char(c) { '_' } else { c })
        .collect()
}
