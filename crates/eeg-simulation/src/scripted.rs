//! Scripted device link that replays injected samples
//!
//! Useful wherever exact sample content matters more than realism: the test
//! decides when the stream exists, what it delivers and when discovery fails.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eeg_core::{
    DeviceLink, RecorderError, RecorderResult, Sample, SampleInlet, StreamDescriptor,
};

#[derive(Default)]
struct ScriptState {
    present: AtomicBool,
    fail_discovery: AtomicBool,
    fail_open: AtomicBool,
    fail_pull: AtomicBool,
    resolve_calls: AtomicUsize,
    queue: Mutex<VecDeque<Sample>>,
}

/// Device link whose stream and samples are controlled by the caller
#[derive(Clone)]
pub struct ScriptedLink {
    descriptor: StreamDescriptor,
    state: Arc<ScriptState>,
}

impl ScriptedLink {
    /// A link advertising one stream of `stream_type` with `channel_count` channels.
    /// The stream starts absent.
    pub fn new(stream_type: &str, channel_count: usize) -> Self {
        Self {
            descriptor: StreamDescriptor {
                name: "Scripted".to_string(),
                stream_type: stream_type.to_string(),
                source_id: "scripted-0".to_string(),
                channel_count,
                nominal_rate: 0.0,
            },
            state: Arc::new(ScriptState::default()),
        }
    }

    pub fn set_present(&self, present: bool) {
        self.state.present.store(present, Ordering::SeqCst);
    }

    /// Make every discovery call return an error
    pub fn set_fail_discovery(&self, fail: bool) {
        self.state.fail_discovery.store(fail, Ordering::SeqCst);
    }

    /// Make opening an inlet fail while discovery still finds the stream
    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make every pull on open inlets return an error
    pub fn set_fail_pull(&self, fail: bool) {
        self.state.fail_pull.store(fail, Ordering::SeqCst);
    }

    /// Queue samples for delivery through open inlets
    pub fn push_samples(&self, samples: impl IntoIterator<Item = Sample>) {
        if let Ok(mut queue) = self.state.queue.lock() {
            queue.extend(samples);
        }
    }

    pub fn resolve_calls(&self) -> usize {
        self.state.resolve_calls.load(Ordering::SeqCst)
    }
}

impl DeviceLink for ScriptedLink {
    fn resolve(&self, stream_type: &str) -> RecorderResult<Option<StreamDescriptor>> {
        self.state.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_discovery.load(Ordering::SeqCst) {
            return Err(RecorderError::Discovery {
                reason: "scripted discovery failure".to_string(),
            });
        }
        let present = self.state.present.load(Ordering::SeqCst);
        if present && stream_type == self.descriptor.stream_type {
            Ok(Some(self.descriptor.clone()))
        } else {
            Ok(None)
        }
    }

    fn open(&self, _descriptor: &StreamDescriptor) -> RecorderResult<Box<dyn SampleInlet>> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(RecorderError::Stream {
                reason: "scripted open failure".to_string(),
            });
        }
        Ok(Box::new(ScriptedInlet {
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedInlet {
    state: Arc<ScriptState>,
}

impl SampleInlet for ScriptedInlet {
    fn pull_sample(&mut self, timeout: Duration) -> RecorderResult<Option<Sample>> {
        if self.state.fail_pull.load(Ordering::SeqCst) {
            return Err(RecorderError::Stream {
                reason: "scripted pull failure".to_string(),
            });
        }
        let next = self
            .state
            .queue
            .lock()
            .map_err(|_| RecorderError::Stream {
                reason: "sample queue poisoned".to_string(),
            })?
            .pop_front();

        match next {
            Some(sample) => Ok(Some(sample)),
            None => {
                // Nothing queued: behave like a stream waiting for data
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_and_replay() {
        let link = ScriptedLink::new("EEG", 5);
        assert!(link.resolve("EEG").unwrap().is_none());

        link.set_present(true);
        let descriptor = link.resolve("EEG").unwrap().unwrap();
        let mut inlet = link.open(&descriptor).unwrap();

        link.push_samples(vec![
            Sample::new(1.0, vec![1.0; 5]),
            Sample::new(2.0, vec![2.0; 5]),
        ]);
        assert_eq!(inlet.pull_sample(Duration::ZERO).unwrap().unwrap().timestamp, 1.0);
        assert_eq!(inlet.pull_sample(Duration::ZERO).unwrap().unwrap().timestamp, 2.0);
        assert!(inlet.pull_sample(Duration::from_millis(1)).unwrap().is_none());
        assert_eq!(link.resolve_calls(), 2);
    }

    #[test]
    fn test_open_and_pull_failures() {
        let link = ScriptedLink::new("EEG", 5);
        link.set_present(true);
        let descriptor = link.resolve("EEG").unwrap().unwrap();

        link.set_fail_open(true);
        assert!(link.open(&descriptor).is_err());
        link.set_fail_open(false);

        let mut inlet = link.open(&descriptor).unwrap();
        link.set_fail_pull(true);
        assert!(inlet.pull_sample(Duration::ZERO).is_err());
    }

    #[test]
    fn test_discovery_failure() {
        let link = ScriptedLink::new("EEG", 5);
        link.set_present(true);
        link.set_fail_discovery(true);
        assert!(link.resolve("EEG").is_err());
    }
}
