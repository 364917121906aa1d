//! Participant session: identifier and cumulative segment durations

use std::fmt::Write as _;
use std::time::Duration;

/// Per-run participant state
///
/// Durations keep insertion order and are never cleared while the process
/// runs; recording a key again replaces its value in place.
#[derive(Debug, Clone, Default)]
pub struct Session {
    participant_id: String,
    durations: Vec<(String, f64)>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Store the trimmed identifier; returns whether it is usable
    pub fn set_participant_id(&mut self, raw: &str) -> bool {
        self.participant_id = raw.trim().to_string();
        self.has_participant()
    }

    pub fn has_participant(&self) -> bool {
        !self.participant_id.is_empty()
    }

    pub fn record_duration(&mut self, key: &str, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        match self.durations.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = seconds,
            None => self.durations.push((key.to_string(), seconds)),
        }
    }

    /// Recorded durations in seconds, in insertion order
    pub fn durations(&self) -> &[(String, f64)] {
        &self.durations
    }

    pub fn duration_of(&self, key: &str) -> Option<f64> {
        self.durations
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, seconds)| *seconds)
    }

    /// Full text of the duration summary file
    pub fn render_summary(&self) -> String {
        let mut text = format!("Participant ID: {}\n", self.participant_id);
        for (key, seconds) in &self.durations {
            // String formatting cannot fail
            let _ = writeln!(text, "{}: {:.2} seconds", key, seconds);
        }
        text
    }
}
