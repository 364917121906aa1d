//! Main application state wired to the recorder service

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use eeg_core::{DeviceBackend, DeviceLink, RecorderConfig, RecorderResult, Sample};
use eeg_simulation::{HeadbandConfig, RhythmProfile, SimulatedHeadband};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::recorder_service::{
    start_recorder_service, Notice, RecorderChannels, RecorderHandle, ServiceStatus,
};
use crate::ui::{ControlPanel, NoticeWindow, PlotData, SimulatorPanel, UIState};

/// How long to wait for in-flight pulls when the window closes
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Main application state
pub struct RecorderApp {
    // Service handles
    handle: RecorderHandle,
    status: watch::Receiver<ServiceStatus>,
    notices: broadcast::Receiver<Notice>,
    samples: broadcast::Receiver<Sample>,

    // Tokio runtime for the service tasks; taken on drop
    runtime: Option<tokio::runtime::Runtime>,

    /// Present when running against the simulated headband
    headband: Option<SimulatedHeadband>,

    // UI state - public for the ui module
    pub ui_state: UIState,
    pub plot_data: PlotData,

    pub config: RecorderConfig,
    pub started_at: DateTime<Local>,
}

impl RecorderApp {
    /// Create the application and start the recorder service
    pub fn new(config: RecorderConfig) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| anyhow::anyhow!("Failed to create tokio runtime: {}", e))?;

        let (link, headband) = build_device_link(&config)?;

        let RecorderChannels {
            handle,
            status,
            notices,
            samples,
            ..
        } = runtime.block_on(async { start_recorder_service(config.clone(), link) })?;

        info!("Recorder ready, waiting for {} stream", config.stream_type);

        Ok(RecorderApp {
            handle,
            status,
            notices,
            samples,
            runtime: Some(runtime),
            headband,
            ui_state: UIState::new(),
            plot_data: PlotData::new(config.channel_labels.clone()),
            config,
            started_at: Local::now(),
        })
    }

    /// Drain service output (called every frame)
    fn update_data(&mut self) {
        loop {
            match self.notices.try_recv() {
                Ok(notice) => self.ui_state.pending_notices.push_back(notice),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Dropped {} notices", skipped);
                }
                Err(_) => break,
            }
        }

        loop {
            match self.samples.try_recv() {
                Ok(sample) => self.plot_data.add_sample(&sample),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    /// Latest published recorder status
    pub fn status(&self) -> ServiceStatus {
        self.status.borrow().clone()
    }

    /// Mirror the participant field into the session
    pub fn set_participant(&mut self, participant_id: &str) {
        let result = self.handle.set_participant(participant_id);
        self.report(result);
    }

    pub fn toggle_segment(&mut self, key: &str) {
        let status = self.status();
        if !status.recorder.is_recording() {
            // Fresh trace for each new segment
            self.plot_data.clear();
        }
        let result = self.handle.toggle_segment(key);
        self.report(result);
    }

    /// Ask the operator for a new output folder
    pub fn choose_output_dir(&mut self) {
        let current = self.status().output_dir;
        if let Some(dir) = rfd::FileDialog::new()
            .set_title("Choose output folder")
            .set_directory(&current)
            .pick_folder()
        {
            let result = self.handle.set_output_dir(dir);
            self.report(result);
        }
    }

    /// Keep the latest refused request visible until one goes through
    fn report(&mut self, result: RecorderResult<()>) {
        self.ui_state.last_error = result.err().map(|e| e.to_string());
    }

    pub fn headband(&self) -> Option<&SimulatedHeadband> {
        self.headband.as_ref()
    }

    pub fn set_headband_power(&mut self, on: bool) {
        if let Some(headband) = &self.headband {
            headband.set_powered(on);
        }
    }

    pub fn set_headband_profile(&mut self, profile: RhythmProfile) {
        if let Some(headband) = &self.headband {
            headband.set_profile(profile);
        }
        self.ui_state.selected_profile = profile;
    }
}

impl Drop for RecorderApp {
    fn drop(&mut self) {
        if let Err(e) = self.handle.shutdown() {
            warn!("Recorder did not take the shutdown request: {}", e);
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        }
    }
}

/// Pick the device backend named by the configuration
fn build_device_link(
    config: &RecorderConfig,
) -> RecorderResult<(Arc<dyn DeviceLink>, Option<SimulatedHeadband>)> {
    if config.backend == DeviceBackend::Lsl {
        #[cfg(feature = "lsl")]
        {
            info!("Using Lab Streaming Layer backend");
            return Ok((Arc::new(crate::lsl_link::LslLink::default()), None));
        }
        #[cfg(not(feature = "lsl"))]
        warn!("Built without the lsl feature, falling back to the simulated headband");
    }

    let mut headband_config = HeadbandConfig {
        stream_type: config.stream_type.clone(),
        ..Default::default()
    };
    headband_config.eeg.channel_count = config.channel_labels.len();
    let headband = SimulatedHeadband::new(headband_config)?;
    info!("Using simulated headband {}", headband.descriptor().name);

    Ok((Arc::new(headband.clone()), Some(headband)))
}

impl eframe::App for RecorderApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.update_data();

        // Keep the stopwatch and preview moving
        ctx.request_repaint_after(Duration::from_millis(50));

        let status = self.status();

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("View", |ui| {
                    ui.checkbox(&mut self.ui_state.show_preview, "Show Preview");
                    if self.headband.is_some() {
                        ui.checkbox(&mut self.ui_state.show_simulator, "Show Simulator");
                    }
                });

                ui.separator();

                let (color, text) = if status.recorder.is_recording() {
                    (egui::Color32::RED, "● RECORDING")
                } else if status.recorder.connected() {
                    (egui::Color32::GREEN, "● CONNECTED")
                } else {
                    (egui::Color32::GRAY, "● WAITING")
                };
                ui.colored_label(color, text);

                ui.separator();
                ui.label(format!("Session started {}", self.started_at.format("%H:%M:%S")));
            });
        });

        egui::SidePanel::left("control_panel")
            .resizable(false)
            .default_width(280.0)
            .show(ctx, |ui| {
                ControlPanel::show(ui, self, &status);

                if self.ui_state.show_simulator && self.headband.is_some() {
                    ui.separator();
                    SimulatorPanel::show(ui, self);
                }
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.ui_state.show_preview {
                self.plot_data.show_plot(ui, &self.ui_state, status.recorder.is_recording());
            } else {
                ui.centered_and_justified(|ui| {
                    ui.label("Preview hidden");
                });
            }
        });

        NoticeWindow::show(ctx, &mut self.ui_state);
    }
}
