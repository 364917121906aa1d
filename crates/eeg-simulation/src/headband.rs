//! Simulated headband exposed through the device link seam
//!
//! The headband streams in real time: an inlet hands out samples no faster
//! than the configured sampling rate. Powering the headband off makes
//! discovery come back empty and fails open inlets, which is what the
//! recorder sees when a real device drops out of range.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use eeg_core::{
    DeviceLink, RecorderError, RecorderResult, Sample, SampleInlet, StreamDescriptor,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::eeg_simulator::{EEGConfig, EEGSimulator};
use crate::signal_patterns::RhythmProfile;

/// An inlet further behind the wall clock than this drops its backlog
const MAX_BACKLOG: Duration = Duration::from_secs(1);

/// Configuration for the simulated headband
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadbandConfig {
    /// EEG simulation configuration
    pub eeg: EEGConfig,
    /// Advertised stream name
    pub name: String,
    /// Advertised stream type
    pub stream_type: String,
    /// Advertised source identifier
    pub source_id: String,
    /// Whether the headband starts switched on
    pub powered_on: bool,
}

impl Default for HeadbandConfig {
    fn default() -> Self {
        Self {
            eeg: EEGConfig::default(),
            name: "Muse-SIM".to_string(),
            stream_type: "EEG".to_string(),
            source_id: "muse-sim-0001".to_string(),
            powered_on: true,
        }
    }
}

struct HeadbandShared {
    config: HeadbandConfig,
    powered: AtomicBool,
    profile: Mutex<RhythmProfile>,
    /// Zero point of the headband's clock
    clock_origin: Instant,
}

/// Simulated Muse-style headband
#[derive(Clone)]
pub struct SimulatedHeadband {
    shared: Arc<HeadbandShared>,
}

impl SimulatedHeadband {
    /// Create new simulated headband
    pub fn new(config: HeadbandConfig) -> RecorderResult<Self> {
        // Fail early on a configuration the inlets could not simulate
        EEGSimulator::new(config.eeg.clone())?;

        let profile = config.eeg.profile;
        let powered = config.powered_on;
        Ok(Self {
            shared: Arc::new(HeadbandShared {
                config,
                powered: AtomicBool::new(powered),
                profile: Mutex::new(profile),
                clock_origin: Instant::now(),
            }),
        })
    }

    pub fn set_powered(&self, on: bool) {
        let was = self.shared.powered.swap(on, Ordering::SeqCst);
        if was != on {
            info!("Simulated headband powered {}", if on { "on" } else { "off" });
        }
    }

    pub fn is_powered(&self) -> bool {
        self.shared.powered.load(Ordering::SeqCst)
    }

    /// Switch the brain-state profile of all open inlets
    pub fn set_profile(&self, profile: RhythmProfile) {
        if let Ok(mut current) = self.shared.profile.lock() {
            *current = profile;
        }
        debug!("Simulated headband profile: {}", profile.description());
    }

    pub fn profile(&self) -> RhythmProfile {
        self.shared
            .profile
            .lock()
            .map(|profile| *profile)
            .unwrap_or(self.shared.config.eeg.profile)
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        let config = &self.shared.config;
        StreamDescriptor {
            name: config.name.clone(),
            stream_type: config.stream_type.clone(),
            source_id: config.source_id.clone(),
            channel_count: config.eeg.channel_count,
            nominal_rate: config.eeg.sampling_rate as f64,
        }
    }
}

impl DeviceLink for SimulatedHeadband {
    fn resolve(&self, stream_type: &str) -> RecorderResult<Option<StreamDescriptor>> {
        if self.is_powered() && self.shared.config.stream_type == stream_type {
            Ok(Some(self.descriptor()))
        } else {
            Ok(None)
        }
    }

    fn open(&self, descriptor: &StreamDescriptor) -> RecorderResult<Box<dyn SampleInlet>> {
        if !self.is_powered() {
            return Err(RecorderError::Stream {
                reason: "headband is powered off".to_string(),
            });
        }
        if descriptor.source_id != self.shared.config.source_id {
            return Err(RecorderError::Stream {
                reason: format!("unknown source {}", descriptor.source_id),
            });
        }

        let simulator = EEGSimulator::new(self.shared.config.eeg.clone())?;
        let opened_at = Instant::now();
        debug!("Opened simulated inlet on {}", descriptor.name);

        Ok(Box::new(SimulatedInlet {
            shared: Arc::clone(&self.shared),
            simulator,
            opened_at,
            clock_offset: opened_at.duration_since(self.shared.clock_origin).as_secs_f64(),
        }))
    }
}

/// Real-time paced inlet on the simulated headband
struct SimulatedInlet {
    shared: Arc<HeadbandShared>,
    simulator: EEGSimulator,
    opened_at: Instant,
    clock_offset: f64,
}

impl SampleInlet for SimulatedInlet {
    fn pull_sample(&mut self, timeout: Duration) -> RecorderResult<Option<Sample>> {
        if !self.shared.powered.load(Ordering::SeqCst) {
            return Err(RecorderError::Stream {
                reason: "headband is powered off".to_string(),
            });
        }

        let now = Instant::now();
        let mut due = self.opened_at + Duration::from_secs_f64(self.simulator.current_time());

        if now > due + MAX_BACKLOG {
            let rate = self.simulator.config().sampling_rate as f64;
            let behind = (now - due).as_secs_f64();
            self.simulator.skip((behind * rate) as u64);
            due = self.opened_at + Duration::from_secs_f64(self.simulator.current_time());
        }

        if due > now {
            let wait = due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }

        if let Ok(profile) = self.shared.profile.lock() {
            self.simulator.set_profile(*profile);
        }
        Ok(Some(self.simulator.next_sample(self.clock_offset)))
    }
}
