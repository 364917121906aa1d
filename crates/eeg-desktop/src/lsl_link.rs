//! Lab Streaming Layer backend for real headbands
//!
//! Streams published by muselsl, BlueMuse or Mind Monitor show up here as
//! soon as they are visible on the local network.

use std::time::Duration;

use eeg_core::{
    DeviceLink, RecorderError, RecorderResult, Sample, SampleInlet, StreamDescriptor,
};
use lsl::Pullable;
use tracing::debug;

/// Discovers and opens LSL streams
pub struct LslLink {
    /// Seconds a single discovery call may wait
    resolve_timeout: f64,
    /// Seconds of data the inlet buffers while nobody pulls
    max_buffered: i32,
}

impl Default for LslLink {
    fn default() -> Self {
        Self {
            resolve_timeout: 1.0,
            max_buffered: 360,
        }
    }
}

fn descriptor_from(info: &lsl::StreamInfo) -> StreamDescriptor {
    StreamDescriptor {
        name: info.stream_name(),
        stream_type: info.stream_type(),
        source_id: info.source_id(),
        channel_count: info.channel_count().max(0) as usize,
        nominal_rate: info.nominal_srate(),
    }
}

impl DeviceLink for LslLink {
    fn resolve(&self, stream_type: &str) -> RecorderResult<Option<StreamDescriptor>> {
        let streams = lsl::resolve_byprop("type", stream_type, 1, self.resolve_timeout)
            .map_err(|e| RecorderError::Discovery {
                reason: format!("{:?}", e),
            })?;
        Ok(streams.first().map(descriptor_from))
    }

    fn open(&self, descriptor: &StreamDescriptor) -> RecorderResult<Box<dyn SampleInlet>> {
        let streams = lsl::resolve_byprop("source_id", &descriptor.source_id, 1, self.resolve_timeout)
            .map_err(|e| RecorderError::Stream {
                reason: format!("{:?}", e),
            })?;
        let info = streams.first().ok_or_else(|| RecorderError::Stream {
            reason: format!("{} disappeared before it could be opened", descriptor.name),
        })?;

        let inlet = lsl::StreamInlet::new(info, self.max_buffered, 0, true)
            .map_err(|e| RecorderError::Stream {
                reason: format!("{:?}", e),
            })?;
        debug!("Opened LSL inlet on {}", descriptor.name);

        Ok(Box::new(LslInlet { inlet }))
    }
}

struct LslInlet {
    inlet: lsl::StreamInlet,
}

impl SampleInlet for LslInlet {
    fn pull_sample(&mut self, timeout: Duration) -> RecorderResult<Option<Sample>> {
        let (channels, timestamp): (Vec<f32>, f64) = self
            .inlet
            .pull_sample(timeout.as_secs_f64())
            .map_err(|e| RecorderError::Stream {
                reason: format!("{:?}", e),
            })?;

        // A zero timestamp means the timeout passed without data
        if timestamp == 0.0 {
            Ok(None)
        } else {
            Ok(Some(Sample::new(timestamp, channels)))
        }
    }
}
