//! Device link: stream discovery and sample inlets
//!
//! The recorder never talks to hardware directly. A [`DeviceLink`] finds a
//! stream of a given type and opens a [`SampleInlet`] on it; the inlet hands
//! out one sample per call. Backends live in other crates (simulation, LSL).

use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::RecorderResult;
use crate::sample::Sample;

/// Opaque description of one discoverable biosignal stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Stream name as advertised by the source
    pub name: String,
    /// Content type, e.g. `"EEG"`
    pub stream_type: String,
    /// Source identifier, stable across reconnects when the device provides one
    pub source_id: String,
    pub channel_count: usize,
    /// Nominal rate in Hz, 0.0 for irregular streams
    pub nominal_rate: f64,
}

/// Discovery side of a device backend
pub trait DeviceLink: Send + Sync {
    /// Look for a stream of the given type. Only the first match is returned.
    fn resolve(&self, stream_type: &str) -> RecorderResult<Option<StreamDescriptor>>;

    /// Open an inlet on a previously resolved stream
    fn open(&self, descriptor: &StreamDescriptor) -> RecorderResult<Box<dyn SampleInlet>>;
}

/// Streaming side of a device backend
pub trait SampleInlet: Send {
    /// Block until the next sample arrives or `timeout` elapses.
    /// `Ok(None)` means the timeout expired without data.
    fn pull_sample(&mut self, timeout: Duration) -> RecorderResult<Option<Sample>>;
}
