//! Recorder state machine
//!
//! `RecorderState` is the single owner of connection status, participant
//! session, segment progression and the sample buffer. It is synchronous and
//! clock-free: callers pass `Instant`s in, which keeps every transition
//! testable without threads or timers.
//!
//! ```text
//! Disconnected --connect--> ConnectedIdle --start--> ConnectedRecording
//!      ^                         ^                          |
//!      |                         +----------stop------------+
//!      +------------------disconnect (any state)------------+
//! ```

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use crate::error::{RecorderError, RecorderResult};
use crate::sample::Sample;
use crate::segment::{SegmentPlan, SegmentView, STOP_LABEL};
use crate::session::Session;
use crate::stopwatch::{Stopwatch, STOPWATCH_ZERO};

/// Coarse controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    ConnectedIdle,
    ConnectedRecording,
}

#[derive(Debug, Clone)]
struct ActiveRecording {
    index: usize,
    key: String,
    generation: u64,
    stopwatch: Stopwatch,
}

/// A recording that just ended, ready to be persisted
#[derive(Debug, Clone)]
pub struct FinishedRecording {
    pub key: String,
    pub index: usize,
    pub generation: u64,
    pub elapsed: Duration,
    pub samples: Vec<Sample>,
    /// Samples refused because their channel count was wrong
    pub dropped: usize,
    /// Ended by a disconnect rather than by the operator
    pub interrupted: bool,
}

/// Outcome of a toggle on a segment control
#[derive(Debug, Clone)]
pub enum Toggle {
    Started { generation: u64 },
    Stopped(FinishedRecording),
}

/// Immutable view published to the display after every change
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderSnapshot {
    pub phase: Phase,
    pub participant_id: String,
    pub segments: Vec<SegmentView>,
    pub stopwatch: String,
    pub buffered_samples: usize,
    pub recording_key: Option<String>,
}

impl RecorderSnapshot {
    pub fn connected(&self) -> bool {
        self.phase != Phase::Disconnected
    }

    pub fn is_recording(&self) -> bool {
        self.phase == Phase::ConnectedRecording
    }
}

pub struct RecorderState {
    plan: SegmentPlan,
    session: Session,
    connected: bool,
    active: Option<ActiveRecording>,
    buffer: Vec<Sample>,
    dropped: usize,
    generation: u64,
    stopwatch_text: String,
    channel_count: usize,
}

impl RecorderState {
    /// Create a disconnected recorder for the given plan.
    /// Samples whose width differs from `channel_count` are rejected.
    pub fn new(plan: SegmentPlan, channel_count: usize) -> Self {
        Self {
            plan,
            session: Session::new(),
            connected: false,
            active: None,
            buffer: Vec::new(),
            dropped: 0,
            generation: 0,
            stopwatch_text: STOPWATCH_ZERO.to_string(),
            channel_count,
        }
    }

    pub fn phase(&self) -> Phase {
        match (self.connected, &self.active) {
            (false, _) => Phase::Disconnected,
            (true, None) => Phase::ConnectedIdle,
            (true, Some(_)) => Phase::ConnectedRecording,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn plan(&self) -> &SegmentPlan {
        &self.plan
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Malformed samples refused during the current recording
    pub fn dropped_samples(&self) -> usize {
        self.dropped
    }

    /// Generation of the running recording, if any
    pub fn active_generation(&self) -> Option<u64> {
        self.active.as_ref().map(|active| active.generation)
    }

    pub fn on_connected(&mut self) {
        if self.connected {
            return;
        }
        self.connected = true;
        self.stopwatch_text = STOPWATCH_ZERO.to_string();
        info!("Device connected");
    }

    /// Drop to `Disconnected`. A recording in progress is ended and returned
    /// so its partial data can still be saved; its segment stays open.
    pub fn on_disconnected(&mut self, now: Instant) -> Option<FinishedRecording> {
        if !self.connected {
            return None;
        }
        self.connected = false;
        info!("Device disconnected");

        let active = self.active.take()?;
        let elapsed = active.stopwatch.elapsed_at(now);
        self.session.record_duration(&active.key, elapsed);
        self.stopwatch_text = STOPWATCH_ZERO.to_string();
        warn!("Recording of {} interrupted after {:.2}s", active.key, elapsed.as_secs_f64());

        Some(FinishedRecording {
            key: active.key,
            index: active.index,
            generation: active.generation,
            elapsed,
            samples: std::mem::take(&mut self.buffer),
            dropped: std::mem::take(&mut self.dropped),
            interrupted: true,
        })
    }

    /// Update the participant identifier. Edits are refused while recording.
    pub fn set_participant_id(&mut self, raw: &str) -> bool {
        if self.active.is_some() {
            debug!("Ignoring participant ID edit during recording");
            return false;
        }
        self.session.set_participant_id(raw)
    }

    /// Whether the control for segment `index` accepts a toggle right now
    pub fn is_segment_enabled(&self, index: usize) -> bool {
        if !self.connected || !self.session.has_participant() {
            return false;
        }
        match &self.active {
            Some(active) => active.index == index,
            None => self.plan.cursor() == Some(index),
        }
    }

    /// Start or stop the segment depending on its current state
    pub fn toggle(&mut self, key: &str, now: Instant) -> RecorderResult<Toggle> {
        let recording_this = self.active.as_ref().map_or(false, |active| active.key == key);
        if recording_this {
            self.stop(key, now).map(Toggle::Stopped)
        } else {
            self.start(key, now).map(|generation| Toggle::Started { generation })
        }
    }

    /// Begin recording `key`; returns the new recording generation
    pub fn start(&mut self, key: &str, now: Instant) -> RecorderResult<u64> {
        let index = self.plan.index_of(key)?;

        if !self.connected {
            return Err(unavailable(key, "device not connected"));
        }
        if !self.session.has_participant() {
            return Err(RecorderError::MissingParticipant);
        }
        if self.active.is_some() {
            return Err(unavailable(key, "another segment is recording"));
        }
        if self.plan.is_completed(index) {
            return Err(unavailable(key, "segment already recorded"));
        }
        if self.plan.cursor() != Some(index) {
            return Err(unavailable(key, "previous segment not recorded yet"));
        }

        self.generation += 1;
        self.buffer = Vec::new();
        self.dropped = 0;
        self.stopwatch_text = STOPWATCH_ZERO.to_string();
        self.active = Some(ActiveRecording {
            index,
            key: key.to_string(),
            generation: self.generation,
            stopwatch: Stopwatch::start(now),
        });

        info!("Recording {} for participant {} (generation {})",
              key, self.session.participant_id(), self.generation);
        Ok(self.generation)
    }

    /// Finish recording `key`. The segment is marked completed and its
    /// duration recorded; the caller persists the returned samples.
    pub fn stop(&mut self, key: &str, now: Instant) -> RecorderResult<FinishedRecording> {
        let index = self.plan.index_of(key)?;
        match &self.active {
            Some(active) if active.index == index => {}
            Some(_) => return Err(unavailable(key, "a different segment is recording")),
            None => return Err(unavailable(key, "segment is not recording")),
        }

        let active = match self.active.take() {
            Some(active) => active,
            None => return Err(unavailable(key, "segment is not recording")),
        };
        let elapsed = active.stopwatch.elapsed_at(now);
        self.session.record_duration(&active.key, elapsed);
        self.plan.mark_completed(index);
        self.stopwatch_text = STOPWATCH_ZERO.to_string();

        info!("Stopped {} after {:.2}s with {} samples",
              key, elapsed.as_secs_f64(), self.buffer.len());
        Ok(FinishedRecording {
            key: active.key,
            index,
            generation: active.generation,
            elapsed,
            samples: std::mem::take(&mut self.buffer),
            dropped: std::mem::take(&mut self.dropped),
            interrupted: false,
        })
    }

    /// Make a completed segment recordable again, e.g. after its save failed
    pub fn reopen(&mut self, key: &str) -> RecorderResult<()> {
        let index = self.plan.index_of(key)?;
        self.plan.reopen(index);
        Ok(())
    }

    /// Append a sample from the pull loop of `generation`.
    /// Returns false when the sample was dropped as stale or malformed.
    pub fn push_sample(&mut self, generation: u64, sample: Sample) -> bool {
        if self.active_generation() != Some(generation) {
            return false;
        }
        if let Err(e) = sample.validate(self.channel_count) {
            // Warn once per recording; a bad stream repeats this for every sample
            if self.dropped == 0 {
                warn!("Dropping sample: {}", e);
            } else {
                debug!("Dropping sample: {}", e);
            }
            self.dropped += 1;
            return false;
        }
        self.buffer.push(sample);
        true
    }

    /// Refresh the stopwatch text for the running recording
    pub fn tick(&mut self, generation: u64, now: Instant) -> bool {
        match &self.active {
            Some(active) if active.generation == generation => {
                self.stopwatch_text = active.stopwatch.display_at(now);
                true
            }
            _ => false,
        }
    }

    pub fn stopwatch_text(&self) -> &str {
        &self.stopwatch_text
    }

    pub fn segments(&self) -> Vec<SegmentView> {
        self.plan
            .specs()
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let recording = self.active.as_ref().map_or(false, |a| a.index == index);
                SegmentView {
                    key: spec.key.clone(),
                    label: if recording { STOP_LABEL.to_string() } else { spec.label.clone() },
                    enabled: self.is_segment_enabled(index),
                    recording,
                    completed: self.plan.is_completed(index),
                }
            })
            .collect()
    }

    pub fn snapshot(&self) -> RecorderSnapshot {
        RecorderSnapshot {
            phase: self.phase(),
            participant_id: self.session.participant_id().to_string(),
            segments: self.segments(),
            stopwatch: self.stopwatch_text.clone(),
            buffered_samples: self.buffer.len(),
            recording_key: self.active.as_ref().map(|a| a.key.clone()),
        }
    }
}

fn unavailable(key: &str, reason: &'static str) -> RecorderError {
    RecorderError::SegmentUnavailable {
        key: key.to_string(),
        reason,
    }
}
