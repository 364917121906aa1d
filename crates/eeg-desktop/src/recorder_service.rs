//! Recorder service: the controller task and its background loops
//!
//! Every change to recorder state goes through the controller task. The
//! connection monitor, the sample puller and the stopwatch only enqueue
//! events; operator intents from the display travel on a second, small queue
//! so a busy sample stream never crowds them out. The controller applies
//! events to [`RecorderState`] one at a time and publishes a fresh
//! [`ServiceStatus`] for the display.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use eeg_core::{
    DeviceLink, FinishedRecording, RecorderConfig, RecorderError, RecorderResult, RecorderSnapshot,
    RecorderState, Sample, SampleInlet, SegmentPlan, SegmentWriter, StreamDescriptor, Toggle,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Stopwatch refresh period
const STOPWATCH_PERIOD: Duration = Duration::from_secs(1);

/// Capacity of the background event queue
const EVENT_CAPACITY: usize = 1024;

/// Capacity of the operator intent queue
const INTENT_CAPACITY: usize = 64;

type SharedInlet = Arc<Mutex<Box<dyn SampleInlet>>>;

/// Everything the controller reacts to
pub enum RecorderEvent {
    /// Monitor found a stream and opened an inlet on it
    Connected {
        descriptor: StreamDescriptor,
        inlet: Box<dyn SampleInlet>,
    },
    /// Monitor lost the stream
    Disconnected,
    /// Monitor found a stream whose channel layout cannot be recorded
    StreamRejected {
        descriptor: StreamDescriptor,
        expected: usize,
    },
    /// Operator edited the participant ID
    SetParticipant(String),
    /// Operator pressed a segment button
    ToggleSegment(String),
    /// Operator picked a new output folder
    SetOutputDir(PathBuf),
    SampleArrived { generation: u64, sample: Sample },
    StopwatchTick { generation: u64 },
    PullFailed { generation: u64, reason: String },
    Shutdown,
}

/// Operator-facing outcome of a save or stream problem
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NoticeKind {
    Saved { key: String, path: PathBuf, rows: usize, dropped: usize },
    Interrupted { key: String, path: PathBuf, rows: usize, dropped: usize },
    SaveFailed { key: String, error: String },
    StreamLost { key: String, reason: String },
    StreamRejected { name: String, channels: usize, expected: usize },
}

impl Notice {
    fn now(kind: NoticeKind) -> Self {
        Self { kind, at: Local::now() }
    }

    pub fn title(&self) -> &'static str {
        match self.kind {
            NoticeKind::Saved { .. } => "Recording Saved",
            NoticeKind::Interrupted { .. } => "Recording Interrupted",
            NoticeKind::SaveFailed { .. } => "Save Failed",
            NoticeKind::StreamLost { .. } => "Stream Lost",
            NoticeKind::StreamRejected { .. } => "Stream Rejected",
        }
    }

    pub fn message(&self) -> String {
        match &self.kind {
            NoticeKind::Saved { key, path, dropped, .. } => {
                format!("{} data saved to {}{}", key, path.display(), dropped_note(*dropped))
            }
            NoticeKind::Interrupted { key, path, rows, dropped } => {
                format!("Device disconnected during {}; {} samples saved to {}{}. Record it again after reconnecting.",
                        key, rows, path.display(), dropped_note(*dropped))
            }
            NoticeKind::SaveFailed { key, error } => {
                format!("Could not save {}: {}", key, error)
            }
            NoticeKind::StreamLost { key, reason } => {
                format!("No more samples for {}: {}", key, reason)
            }
            NoticeKind::StreamRejected { name, channels, expected } => {
                format!("{} streams {} channels but recordings need {}; it will not be used.",
                        name, channels, expected)
            }
        }
    }

    pub fn is_error(&self) -> bool {
        match self.kind {
            NoticeKind::Saved { dropped, .. } | NoticeKind::Interrupted { dropped, .. } => dropped > 0,
            _ => true,
        }
    }
}

fn dropped_note(dropped: usize) -> String {
    if dropped == 0 {
        String::new()
    } else {
        format!(" ({} malformed samples dropped)", dropped)
    }
}

/// Snapshot published to the display after every event
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    pub recorder: RecorderSnapshot,
    pub device: Option<StreamDescriptor>,
    pub output_dir: PathBuf,
    pub last_notice: Option<Notice>,
}

/// Live background loop counts
#[derive(Debug, Default)]
pub struct LoopCounters {
    pullers: AtomicUsize,
    stopwatches: AtomicUsize,
}

impl LoopCounters {
    pub fn pullers(&self) -> usize {
        self.pullers.load(Ordering::SeqCst)
    }

    pub fn stopwatches(&self) -> usize {
        self.stopwatches.load(Ordering::SeqCst)
    }
}

/// Decrements its counter when the loop owning it ends, including on abort
struct LoopGuard<'a>(&'a AtomicUsize);

impl<'a> LoopGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cheap handle for sending operator intents from the UI thread.
/// A refused intent is returned as an error so the display can show it.
#[derive(Clone)]
pub struct RecorderHandle {
    intents: mpsc::Sender<RecorderEvent>,
}

impl RecorderHandle {
    fn send(&self, intent: RecorderEvent) -> RecorderResult<()> {
        self.intents.try_send(intent).map_err(|e| {
            error!("Failed to send recorder intent: {}", e);
            RecorderError::ControllerUnavailable {
                reason: e.to_string(),
            }
        })
    }

    pub fn set_participant(&self, participant_id: &str) -> RecorderResult<()> {
        self.send(RecorderEvent::SetParticipant(participant_id.to_string()))
    }

    pub fn toggle_segment(&self, key: &str) -> RecorderResult<()> {
        self.send(RecorderEvent::ToggleSegment(key.to_string()))
    }

    pub fn set_output_dir(&self, dir: PathBuf) -> RecorderResult<()> {
        self.send(RecorderEvent::SetOutputDir(dir))
    }

    pub fn shutdown(&self) -> RecorderResult<()> {
        self.send(RecorderEvent::Shutdown)
    }
}

/// Receivers handed to the display
pub struct RecorderChannels {
    pub handle: RecorderHandle,
    pub status: watch::Receiver<ServiceStatus>,
    pub notices: broadcast::Receiver<Notice>,
    pub samples: broadcast::Receiver<Sample>,
    pub counters: Arc<LoopCounters>,
}

struct PullerHandle {
    stop: Arc<AtomicBool>,
}

/// Controller owning the recorder state
pub struct RecorderService {
    config: RecorderConfig,
    state: RecorderState,
    writer: SegmentWriter,

    // Communication channels
    intents: mpsc::Receiver<RecorderEvent>,
    events: mpsc::Receiver<RecorderEvent>,
    event_sender: mpsc::Sender<RecorderEvent>,
    status_sender: watch::Sender<ServiceStatus>,
    notice_sender: broadcast::Sender<Notice>,
    sample_sender: broadcast::Sender<Sample>,

    // Device and loop management
    device: Option<StreamDescriptor>,
    inlet: Option<SharedInlet>,
    puller: Option<PullerHandle>,
    stopwatch: Option<JoinHandle<()>>,
    counters: Arc<LoopCounters>,
    last_notice: Option<Notice>,
}

impl RecorderService {
    /// Create new recorder service
    pub fn new(config: RecorderConfig) -> RecorderResult<(Self, RecorderChannels)> {
        config.validate()?;
        let plan = SegmentPlan::new(config.segments.clone())?;
        let state = RecorderState::new(plan, config.channel_labels.len());
        let writer = SegmentWriter::new(config.output_dir.clone(), config.csv_header());

        let (intent_sender, intents) = mpsc::channel(INTENT_CAPACITY);
        let (event_sender, events) = mpsc::channel(EVENT_CAPACITY);
        let (notice_sender, notices) = broadcast::channel(16);
        let (sample_sender, samples) = broadcast::channel(1024);
        let (status_sender, status) = watch::channel(ServiceStatus {
            recorder: state.snapshot(),
            device: None,
            output_dir: config.output_dir.clone(),
            last_notice: None,
        });
        let counters = Arc::new(LoopCounters::default());

        let channels = RecorderChannels {
            handle: RecorderHandle { intents: intent_sender },
            status,
            notices,
            samples,
            counters: Arc::clone(&counters),
        };

        Ok((
            RecorderService {
                config,
                state,
                writer,
                intents,
                events,
                event_sender,
                status_sender,
                notice_sender,
                sample_sender,
                device: None,
                inlet: None,
                puller: None,
                stopwatch: None,
                counters,
                last_notice: None,
            },
            channels,
        ))
    }

    /// Sender feeding this service's event queue
    pub fn event_sender(&self) -> mpsc::Sender<RecorderEvent> {
        self.event_sender.clone()
    }

    /// Main controller loop
    pub async fn run(mut self) {
        info!("Recorder service started - output: {}", self.writer.output_dir().display());

        loop {
            let (event, from_operator) = tokio::select! {
                biased;
                Some(intent) = self.intents.recv() => (intent, true),
                Some(event) = self.events.recv() => (event, false),
                else => break,
            };

            if from_operator {
                self.drain_background().await;
            }
            if matches!(event, RecorderEvent::Shutdown) {
                break;
            }
            self.handle_event(event).await;
            self.publish();
        }

        self.stop_loops();
        info!("Recorder service stopped");
    }

    /// Apply what the background loops queued before an operator intent,
    /// so samples pulled before a stop click still reach the file
    async fn drain_background(&mut self) {
        for _ in 0..EVENT_CAPACITY {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(event).await,
                Err(_) => break,
            }
        }
    }

    async fn handle_event(&mut self, event: RecorderEvent) {
        match event {
            RecorderEvent::Connected { descriptor, inlet } => {
                info!("Connected to {} ({} channels @ {}Hz)",
                      descriptor.name, descriptor.channel_count, descriptor.nominal_rate);
                self.device = Some(descriptor);
                self.inlet = Some(Arc::new(Mutex::new(inlet)));
                self.state.on_connected();
            }
            RecorderEvent::Disconnected => {
                let interrupted = self.state.on_disconnected(Instant::now());
                self.stop_loops();
                self.device = None;
                self.inlet = None;
                if let Some(finished) = interrupted {
                    self.persist(finished).await;
                }
            }
            RecorderEvent::StreamRejected { descriptor, expected } => {
                warn!("Ignoring {}: it has {} channels, data files expect {}",
                      descriptor.name, descriptor.channel_count, expected);
                self.notify(Notice::now(NoticeKind::StreamRejected {
                    name: descriptor.name,
                    channels: descriptor.channel_count,
                    expected,
                }));
            }
            RecorderEvent::SetParticipant(raw) => {
                self.state.set_participant_id(&raw);
            }
            RecorderEvent::ToggleSegment(key) => {
                self.toggle_segment(&key).await;
            }
            RecorderEvent::SetOutputDir(dir) => {
                if self.state.active_generation().is_some() {
                    warn!("Ignoring output folder change during recording");
                } else {
                    info!("Output folder set to {}", dir.display());
                    self.writer.set_output_dir(dir);
                }
            }
            RecorderEvent::SampleArrived { generation, sample } => {
                let preview = sample.clone();
                if self.state.push_sample(generation, sample) {
                    // No subscribers is fine
                    let _ = self.sample_sender.send(preview);
                }
            }
            RecorderEvent::StopwatchTick { generation } => {
                self.state.tick(generation, Instant::now());
            }
            RecorderEvent::PullFailed { generation, reason } => {
                if self.state.active_generation() == Some(generation) {
                    let key = self.state.snapshot().recording_key.unwrap_or_default();
                    warn!("Sample stream for {} failed: {}", key, reason);
                    self.notify(Notice::now(NoticeKind::StreamLost { key, reason }));
                }
            }
            RecorderEvent::Shutdown => {}
        }
    }

    async fn toggle_segment(&mut self, key: &str) {
        match self.state.toggle(key, Instant::now()) {
            Ok(Toggle::Started { generation }) => self.start_loops(generation),
            Ok(Toggle::Stopped(finished)) => {
                self.stop_loops();
                self.persist(finished).await;
            }
            Err(e) => warn!("Ignoring toggle of {}: {}", key, e),
        }
    }

    fn start_loops(&mut self, generation: u64) {
        self.stop_loops();

        match &self.inlet {
            Some(inlet) => {
                let stop = Arc::new(AtomicBool::new(false));
                spawn_puller(
                    Arc::clone(inlet),
                    generation,
                    self.config.pull_timeout(),
                    Arc::clone(&stop),
                    self.event_sender.clone(),
                    Arc::clone(&self.counters),
                );
                self.puller = Some(PullerHandle { stop });
            }
            None => warn!("Recording {} without an open inlet", generation),
        }

        self.stopwatch = Some(spawn_stopwatch(
            generation,
            STOPWATCH_PERIOD,
            self.event_sender.clone(),
            Arc::clone(&self.counters),
        ));
    }

    fn stop_loops(&mut self) {
        if let Some(puller) = self.puller.take() {
            puller.stop.store(true, Ordering::SeqCst);
        }
        if let Some(stopwatch) = self.stopwatch.take() {
            stopwatch.abort();
        }
    }

    /// Write the finished segment and report the outcome
    async fn persist(&mut self, finished: FinishedRecording) {
        let writer = self.writer.clone();
        let session = self.state.session().clone();
        let key = finished.key.clone();
        let interrupted = finished.interrupted;
        let dropped = finished.dropped;
        let samples = finished.samples;

        let result = tokio::task::spawn_blocking(move || writer.save(&session, &key, &samples))
            .await;

        let notice = match result {
            Ok(Ok(saved)) if interrupted => NoticeKind::Interrupted {
                key: saved.key,
                path: saved.data_path,
                rows: saved.rows,
                dropped,
            },
            Ok(Ok(saved)) => NoticeKind::Saved {
                key: saved.key,
                path: saved.data_path,
                rows: saved.rows,
                dropped,
            },
            Ok(Err(e)) => self.save_failed(&finished.key, interrupted, e.to_string()),
            Err(e) => self.save_failed(&finished.key, interrupted, e.to_string()),
        };
        self.notify(Notice::now(notice));
    }

    fn save_failed(&mut self, key: &str, interrupted: bool, error: String) -> NoticeKind {
        error!("Saving {} failed: {}", key, error);
        if !interrupted {
            // Let the operator record the segment again
            if let Err(e) = self.state.reopen(key) {
                warn!("Cannot reopen {}: {}", key, e);
            }
        }
        NoticeKind::SaveFailed {
            key: key.to_string(),
            error,
        }
    }

    fn notify(&mut self, notice: Notice) {
        self.last_notice = Some(notice.clone());
        let _ = self.notice_sender.send(notice);
    }

    fn publish(&self) {
        let status = ServiceStatus {
            recorder: self.state.snapshot(),
            device: self.device.clone(),
            output_dir: self.writer.output_dir().to_path_buf(),
            last_notice: self.last_notice.clone(),
        };
        self.status_sender.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Result of one discovery poll
enum Discovery {
    Opened(StreamDescriptor, Box<dyn SampleInlet>),
    /// Found, but with a channel count the data files cannot hold
    Rejected(StreamDescriptor),
    StillPresent,
    Absent,
}

fn discover_stream(
    link: &dyn DeviceLink,
    stream_type: &str,
    expected_channels: usize,
    connected: bool,
) -> Discovery {
    match link.resolve(stream_type) {
        Ok(Some(_)) if connected => Discovery::StillPresent,
        Ok(Some(descriptor)) if descriptor.channel_count != expected_channels => {
            Discovery::Rejected(descriptor)
        }
        Ok(Some(descriptor)) => match link.open(&descriptor) {
            Ok(inlet) => Discovery::Opened(descriptor, inlet),
            Err(e) => {
                warn!("Found {} but could not open it: {}", descriptor.name, e);
                Discovery::Absent
            }
        },
        Ok(None) => Discovery::Absent,
        Err(e) => {
            debug!("Discovery failed: {}", e);
            Discovery::Absent
        }
    }
}

/// Poll the device link forever and report connection transitions.
/// A stream with the wrong channel count never counts as connected and is
/// reported once per appearance. Ends only when the controller's queue is closed.
pub async fn monitor_connection(
    link: Arc<dyn DeviceLink>,
    stream_type: String,
    expected_channels: usize,
    poll_interval: Duration,
    events: mpsc::Sender<RecorderEvent>,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut connected = false;
    let mut rejected: Option<String> = None;

    info!("Monitoring for {} streams every {:?}", stream_type, poll_interval);

    loop {
        ticker.tick().await;

        let discovery = {
            let link = Arc::clone(&link);
            let stream_type = stream_type.clone();
            tokio::task::spawn_blocking(move || {
                discover_stream(link.as_ref(), &stream_type, expected_channels, connected)
            })
            .await
        };

        let event = match discovery {
            Ok(Discovery::Opened(descriptor, inlet)) => {
                connected = true;
                rejected = None;
                Some(RecorderEvent::Connected { descriptor, inlet })
            }
            Ok(Discovery::Rejected(descriptor)) => {
                if rejected.as_deref() == Some(descriptor.source_id.as_str()) {
                    None
                } else {
                    rejected = Some(descriptor.source_id.clone());
                    Some(RecorderEvent::StreamRejected {
                        descriptor,
                        expected: expected_channels,
                    })
                }
            }
            Ok(Discovery::StillPresent) => None,
            Ok(Discovery::Absent) => {
                rejected = None;
                if connected {
                    connected = false;
                    Some(RecorderEvent::Disconnected)
                } else {
                    None
                }
            }
            Err(e) => {
                warn!("Discovery task failed: {}", e);
                if connected {
                    connected = false;
                    Some(RecorderEvent::Disconnected)
                } else {
                    None
                }
            }
        };

        if let Some(event) = event {
            if events.send(event).await.is_err() {
                debug!("Recorder queue closed, stopping connection monitor");
                break;
            }
        }
    }
}

/// Pull samples on a blocking thread until `stop` is raised or the inlet fails
fn spawn_puller(
    inlet: SharedInlet,
    generation: u64,
    timeout: Duration,
    stop: Arc<AtomicBool>,
    events: mpsc::Sender<RecorderEvent>,
    counters: Arc<LoopCounters>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let _guard = LoopGuard::enter(&counters.pullers);
        let mut inlet = match inlet.lock() {
            Ok(inlet) => inlet,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!("Sample puller {} started", generation);

        while !stop.load(Ordering::SeqCst) {
            match inlet.pull_sample(timeout) {
                Ok(Some(sample)) => {
                    if events
                        .blocking_send(RecorderEvent::SampleArrived { generation, sample })
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = events.blocking_send(RecorderEvent::PullFailed {
                        generation,
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }

        debug!("Sample puller {} finished", generation);
    })
}

/// Emit a tick for `generation` once per `period` until aborted
fn spawn_stopwatch(
    generation: u64,
    period: Duration,
    events: mpsc::Sender<RecorderEvent>,
    counters: Arc<LoopCounters>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _guard = LoopGuard::enter(&counters.stopwatches);
        let mut ticker = interval(period);
        // The first tick completes immediately; the display already shows zero
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if events.send(RecorderEvent::StopwatchTick { generation }).await.is_err() {
                break;
            }
        }
    })
}

/// Start the controller and connection monitor in the background
pub fn start_recorder_service(
    config: RecorderConfig,
    link: Arc<dyn DeviceLink>,
) -> RecorderResult<RecorderChannels> {
    let stream_type = config.stream_type.clone();
    let expected_channels = config.channel_labels.len();
    let poll_interval = config.poll_interval();
    let (service, channels) = RecorderService::new(config)?;
    let events = service.event_sender();

    tokio::spawn(service.run());
    tokio::spawn(monitor_connection(
        link,
        stream_type,
        expected_channels,
        poll_interval,
        events,
    ));

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_core::{Phase, MUSE_CHANNEL_LABELS};
    use eeg_simulation::ScriptedLink;
    use std::path::Path;
    use tokio::time::{sleep, timeout};

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        link: ScriptedLink,
        channels: RecorderChannels,
        _dir: tempfile::TempDir,
        output: PathBuf,
    }

    fn start() -> Harness {
        start_with_channels(MUSE_CHANNEL_LABELS.len())
    }

    /// Service expecting the Muse layout, fed by a link with `channel_count` channels
    fn start_with_channels(channel_count: usize) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().to_path_buf();
        let config = RecorderConfig {
            output_dir: output.clone(),
            poll_interval_ms: 20,
            pull_timeout_ms: 10,
            ..Default::default()
        };
        let link = ScriptedLink::new("EEG", channel_count);
        let channels = start_recorder_service(config, Arc::new(link.clone())).unwrap();
        Harness { link, channels, _dir: dir, output }
    }

    impl Harness {
        async fn wait_status<F>(&mut self, what: &str, mut predicate: F) -> ServiceStatus
        where
            F: FnMut(&ServiceStatus) -> bool,
        {
            let status = timeout(WAIT, self.channels.status.wait_for(|s| predicate(s)))
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
                .unwrap();
            status.clone()
        }

        async fn next_notice(&mut self) -> Notice {
            timeout(WAIT, self.channels.notices.recv())
                .await
                .expect("timed out waiting for notice")
                .unwrap()
        }

        async fn connect_with_participant(&mut self, participant: &str) {
            self.link.set_present(true);
            self.wait_status("connect", |s| s.recorder.connected()).await;
            self.channels.handle.set_participant(participant).unwrap();
            self.wait_status("participant", |s| s.recorder.participant_id == participant).await;
        }

        /// Wait until the monitor has polled `polls` more times
        async fn wait_polls(&self, polls: usize) {
            let target = self.link.resolve_calls() + polls;
            timeout(WAIT, async {
                while self.link.resolve_calls() < target {
                    sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("monitor stopped polling");
        }

        /// Record `key` for at least `hold`. Returns lower and upper bounds in
        /// seconds for the duration the controller can have measured.
        async fn record_for(&mut self, key: &str, hold: Duration) -> (f64, f64) {
            let outer = Instant::now();
            self.channels.handle.toggle_segment(key).unwrap();
            self.wait_status("recording", |s| s.recorder.recording_key.as_deref() == Some(key)).await;
            let inner = Instant::now();
            sleep(hold).await;
            let lower = inner.elapsed().as_secs_f64();
            self.channels.handle.toggle_segment(key).unwrap();
            self.next_notice().await;
            (lower, outer.elapsed().as_secs_f64())
        }

        async fn record(&mut self, key: &str, samples: Vec<Sample>) -> Notice {
            let expected = samples.len();
            self.channels.handle.toggle_segment(key).unwrap();
            self.wait_status("recording", |s| s.recorder.recording_key.as_deref() == Some(key)).await;
            self.link.push_samples(samples);
            self.wait_status("samples", |s| s.recorder.buffered_samples == expected).await;
            self.channels.handle.toggle_segment(key).unwrap();
            self.next_notice().await
        }
    }

    fn enabled(status: &ServiceStatus) -> Vec<String> {
        status
            .recorder
            .segments
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.key.clone())
            .collect()
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_status_follows_stream_presence() {
        let mut h = start();
        h.channels.handle.set_participant("P01").unwrap();

        for present in [true, false, true, false] {
            h.link.set_present(present);
            let status = h.wait_status("transition", |s| s.recorder.connected() == present).await;
            assert_eq!(status.device.is_some(), present);
            // Retained participant re-enables the first segment on every connect
            assert_eq!(enabled(&status).is_empty(), !present);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_discovery_error_counts_as_disconnect() {
        let mut h = start();
        h.link.set_present(true);
        h.wait_status("connect", |s| s.recorder.connected()).await;

        h.link.set_fail_discovery(true);
        h.wait_status("disconnect", |s| !s.recorder.connected()).await;

        // Monitor keeps polling after errors
        h.link.set_fail_discovery(false);
        h.wait_status("reconnect", |s| s.recorder.connected()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_injected_samples_are_saved_verbatim() {
        let mut h = start();
        h.connect_with_participant("P01").await;

        let samples = vec![
            Sample::new(10.0, vec![1.0, 2.0, 3.0, 4.0, 5.0]),
            Sample::new(10.00390625, vec![6.5, 7.5, 8.5, 9.5, 10.5]),
            Sample::new(10.0078125, vec![-1.0, -2.0, -3.0, -4.0, -5.0]),
        ];
        let notice = h.record("EC", samples.clone()).await;

        let path = match &notice.kind {
            NoticeKind::Saved { path, rows, .. } => {
                assert_eq!(*rows, 3);
                path.clone()
            }
            other => panic!("unexpected notice {:?}", other),
        };
        assert_eq!(path, h.output.join("P01_EC.csv"));
        assert_eq!(notice.title(), "Recording Saved");

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, ["timestamps", "TP9", "AF7", "AF8", "TP10", "Right AUX"]);
        let rows: Vec<Sample> = reader
            .records()
            .map(|r| {
                let r = r.unwrap();
                let values: Vec<&str> = r.iter().collect();
                Sample::new(
                    values[0].parse().unwrap(),
                    values[1..].iter().map(|v| v.parse().unwrap()).collect(),
                )
            })
            .collect();
        assert_eq!(rows, samples);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_saved_notice_counts_malformed_samples() {
        let mut h = start();
        h.connect_with_participant("P03").await;

        h.channels.handle.toggle_segment("EC").unwrap();
        h.wait_status("recording", |s| s.recorder.is_recording()).await;
        h.link.push_samples(vec![
            Sample::new(1.0, vec![1.0, 2.0, 3.0, 4.0, 5.0]),
            Sample::new(1.1, vec![1.0, 2.0, 3.0, 4.0]),
            Sample::new(1.2, vec![6.0, 7.0, 8.0, 9.0, 10.0]),
        ]);
        h.wait_status("samples", |s| s.recorder.buffered_samples == 2).await;
        h.channels.handle.toggle_segment("EC").unwrap();

        let notice = h.next_notice().await;
        assert!(matches!(notice.kind, NoticeKind::Saved { rows: 2, dropped: 1, .. }));
        assert!(notice.is_error());
        assert!(notice.message().ends_with("(1 malformed samples dropped)"), "{}", notice.message());
        assert_eq!(read(&h.output.join("P03_EC.csv")).lines().count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_immediate_stop_writes_header_only() {
        let mut h = start();
        h.connect_with_participant("P01").await;

        let notice = h.record("EC", Vec::new()).await;
        assert!(matches!(notice.kind, NoticeKind::Saved { rows: 0, .. }));

        assert_eq!(read(&h.output.join("P01_EC.csv")), "timestamps,TP9,AF7,AF8,TP10,Right AUX\n");
        let summary = read(&h.output.join("P01_duration.txt"));
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "Participant ID: P01");
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("EC: 0.0"), "unexpected line {}", lines[1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_durations_listed_in_recording_order() {
        let mut h = start();
        h.connect_with_participant("P02").await;

        let ec = h.record_for("EC", Duration::from_millis(120)).await;
        let status = h.wait_status("EO enabled", |s| enabled(s) == ["EO"]).await;
        assert_eq!(status.recorder.stopwatch, "00:00:00");
        let eo = h.record_for("EO", Duration::from_millis(40)).await;

        let summary = read(&h.output.join("P02_duration.txt"));
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 3);
        for (line, (key, (lower, upper))) in lines[1..].iter().zip([("EC", ec), ("EO", eo)]) {
            let rest = line.strip_prefix(&format!("{}: ", key)).unwrap();
            let seconds: f64 = rest.strip_suffix(" seconds").unwrap().parse().unwrap();
            // Two decimals round by at most half a hundredth
            assert!(seconds >= lower - 0.005 && seconds <= upper + 0.005,
                    "{} outside [{:.3}, {:.3}]", line, lower, upper);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stopwatch_ticks_while_recording() {
        let mut h = start();
        h.connect_with_participant("P03").await;

        h.channels.handle.toggle_segment("EC").unwrap();
        h.wait_status("recording", |s| s.recorder.is_recording()).await;
        let status = h.wait_status("tick", |s| s.recorder.stopwatch == "00:00:01").await;
        assert_eq!(status.recorder.phase, Phase::ConnectedRecording);

        h.channels.handle.toggle_segment("EC").unwrap();
        let status = h.wait_status("stopped", |s| !s.recorder.is_recording()).await;
        assert_eq!(status.recorder.stopwatch, "00:00:00");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disconnect_mid_recording_stops_loops() {
        let mut h = start();
        h.connect_with_participant("P04").await;

        h.channels.handle.toggle_segment("EC").unwrap();
        h.wait_status("recording", |s| s.recorder.is_recording()).await;
        h.link.push_samples(vec![Sample::new(1.0, vec![0.5; 5])]);
        h.wait_status("sample", |s| s.recorder.buffered_samples == 1).await;

        h.link.set_present(false);
        let notice = h.next_notice().await;
        assert!(matches!(notice.kind, NoticeKind::Interrupted { rows: 1, .. }));
        let status = h.wait_status("disconnect", |s| !s.recorder.connected()).await;
        assert!(enabled(&status).is_empty());

        timeout(WAIT, async {
            while h.channels.counters.pullers() > 0 || h.channels.counters.stopwatches() > 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("background loops still running");

        // Participant survives the disconnect, so EC is offered again
        h.link.set_present(true);
        let status = h.wait_status("reconnect", |s| s.recorder.connected()).await;
        assert_eq!(status.recorder.participant_id, "P04");
        assert_eq!(enabled(&status), ["EC"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_later_segments_rejected_out_of_order() {
        let mut h = start();
        h.connect_with_participant("P05").await;

        h.channels.handle.toggle_segment("EO").unwrap();
        // Toggle of EC after EO proves EO was ignored
        h.channels.handle.toggle_segment("EC").unwrap();
        let status = h.wait_status("recording", |s| s.recorder.is_recording()).await;
        assert_eq!(status.recorder.recording_key.as_deref(), Some("EC"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_save_failure_reopens_segment() {
        let mut h = start();
        h.connect_with_participant("P06").await;

        // A regular file where the output folder should be
        let blocked = h.output.join("not-a-dir");
        std::fs::write(&blocked, "x").unwrap();
        h.channels.handle.set_output_dir(blocked).unwrap();

        let notice = h.record("EC", Vec::new()).await;
        assert!(notice.is_error());
        assert_eq!(notice.title(), "Save Failed");
        let status = h.wait_status("EC reopened", |s| enabled(s) == ["EC"]).await;
        assert_eq!(status.last_notice, Some(notice));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stream_with_wrong_channel_count_is_refused() {
        let mut h = start_with_channels(4);
        h.channels.handle.set_participant("P08").unwrap();
        h.link.set_present(true);

        let notice = h.next_notice().await;
        assert_eq!(notice.title(), "Stream Rejected");
        assert!(notice.is_error());
        assert!(matches!(
            notice.kind,
            NoticeKind::StreamRejected { channels: 4, expected: 5, .. }
        ));

        // Later polls neither connect nor repeat the notice
        h.wait_polls(5).await;
        let status = h.channels.status.borrow().clone();
        assert!(!status.recorder.connected());
        assert!(enabled(&status).is_empty());
        assert!(h.channels.notices.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_open_is_retried() {
        let mut h = start();
        h.link.set_fail_open(true);
        h.link.set_present(true);

        h.wait_polls(3).await;
        assert!(!h.channels.status.borrow().recorder.connected());

        h.link.set_fail_open(false);
        h.wait_status("connect", |s| s.recorder.connected()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pull_error_raises_stream_lost() {
        let mut h = start();
        h.connect_with_participant("P09").await;

        h.channels.handle.toggle_segment("EC").unwrap();
        h.wait_status("recording", |s| s.recorder.is_recording()).await;
        h.link.set_fail_pull(true);

        let notice = h.next_notice().await;
        assert_eq!(notice.title(), "Stream Lost");
        assert!(matches!(&notice.kind, NoticeKind::StreamLost { key, .. } if key == "EC"));

        timeout(WAIT, async {
            while h.channels.counters.pullers() > 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("puller still running");

        // The operator can still end the segment
        assert!(h.channels.status.borrow().recorder.is_recording());
        h.link.set_fail_pull(false);
        h.channels.handle.toggle_segment("EC").unwrap();
        let notice = h.next_notice().await;
        assert!(matches!(notice.kind, NoticeKind::Saved { rows: 0, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_output_folder_locked_while_recording() {
        let mut h = start();
        h.connect_with_participant("P07").await;

        h.channels.handle.toggle_segment("EC").unwrap();
        h.wait_status("recording", |s| s.recorder.is_recording()).await;
        let elsewhere = h.output.join("elsewhere");
        h.channels.handle.set_output_dir(elsewhere.clone()).unwrap();
        h.channels.handle.toggle_segment("EC").unwrap();

        let notice = h.next_notice().await;
        assert!(matches!(
            &notice.kind,
            NoticeKind::Saved { path, .. } if *path == h.output.join("P07_EC.csv")
        ));
        let status = h.wait_status("stopped", |s| !s.recorder.is_recording()).await;
        assert_eq!(status.output_dir, h.output);
        assert!(!elsewhere.exists());
    }

    #[test]
    fn test_handle_reports_refused_intents() {
        let (service, channels) = RecorderService::new(RecorderConfig::default()).unwrap();

        for _ in 0..INTENT_CAPACITY {
            channels.handle.toggle_segment("EC").unwrap();
        }
        let err = channels.handle.toggle_segment("EC").unwrap_err();
        assert!(matches!(err, RecorderError::ControllerUnavailable { .. }));

        // Background traffic has its own queue
        let events = service.event_sender();
        assert!(events.try_send(RecorderEvent::StopwatchTick { generation: 1 }).is_ok());

        drop(service);
        assert!(channels.handle.set_participant("P01").is_err());
    }
}
