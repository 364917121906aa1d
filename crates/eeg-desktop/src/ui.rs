//! UI components and state management

use std::collections::VecDeque;

use eeg_core::Sample;
use eeg_simulation::RhythmProfile;
use egui_plot::{Corner, Legend, Line, Plot, PlotPoints};

use crate::app::RecorderApp;
use crate::recorder_service::{Notice, ServiceStatus};

/// Vertical spacing between stacked channel traces in µV
const TRACE_SPACING: f64 = 150.0;

/// UI state management
#[derive(Debug)]
pub struct UIState {
    // Panel visibility
    pub show_preview: bool,
    pub show_simulator: bool,

    // Control values
    pub participant_input: String,
    pub selected_profile: RhythmProfile,

    // Plot settings
    pub plot_window_duration: f64,

    /// Notices waiting to be acknowledged, oldest first
    pub pending_notices: VecDeque<Notice>,

    /// Last request the recorder refused to queue
    pub last_error: Option<String>,
}

impl UIState {
    pub fn new() -> Self {
        Self {
            show_preview: true,
            show_simulator: true,

            participant_input: String::new(),
            selected_profile: RhythmProfile::EyesOpen,

            plot_window_duration: 4.0,

            pending_notices: VecDeque::new(),
            last_error: None,
        }
    }
}

/// Rolling buffer of recorded samples for the live preview
pub struct PlotData {
    time_series: VecDeque<(f64, Vec<f32>)>,
    labels: Vec<String>,
    max_points: usize,
}

impl PlotData {
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            time_series: VecDeque::new(),
            labels,
            max_points: 2560, // 10 seconds at 256Hz
        }
    }

    pub fn is_empty(&self) -> bool {
        self.time_series.is_empty()
    }

    pub fn len(&self) -> usize {
        self.time_series.len()
    }

    pub fn add_sample(&mut self, sample: &Sample) {
        self.time_series.push_back((sample.timestamp, sample.channels.clone()));
        if self.time_series.len() > self.max_points {
            self.time_series.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.time_series.clear();
    }

    fn latest_time(&self) -> f64 {
        self.time_series.back().map(|(time, _)| *time).unwrap_or(0.0)
    }

    /// Points of channel `ch` inside the trailing `window` seconds, offset for stacking
    fn channel_points(&self, ch: usize, window: f64) -> Vec<[f64; 2]> {
        let latest = self.latest_time();
        let offset = -(ch as f64) * TRACE_SPACING;
        self.time_series
            .iter()
            .filter(|(time, _)| *time >= latest - window)
            .filter_map(|(time, channels)| {
                channels.get(ch).map(|value| [*time - latest, *value as f64 + offset])
            })
            .collect()
    }

    /// Show the EEG preview
    pub fn show_plot(&self, ui: &mut egui::Ui, ui_state: &UIState, recording: bool) {
        ui.heading("EEG Preview");

        if self.is_empty() {
            ui.label(if recording {
                "Waiting for samples..."
            } else {
                "Start a segment to preview its samples"
            });
            return;
        }

        let plot = Plot::new("eeg_plot")
            .legend(Legend::default().position(Corner::LeftTop))
            .show_axes([true, false])
            .allow_zoom(false)
            .allow_drag(false)
            .include_x(-ui_state.plot_window_duration);

        plot.show(ui, |plot_ui| {
            for (ch, label) in self.labels.iter().enumerate() {
                let points = self.channel_points(ch, ui_state.plot_window_duration);
                if points.is_empty() {
                    continue;
                }

                let color = match ch {
                    0 => egui::Color32::from_rgb(255, 100, 100),
                    1 => egui::Color32::from_rgb(100, 255, 100),
                    2 => egui::Color32::from_rgb(100, 100, 255),
                    3 => egui::Color32::from_rgb(255, 255, 100),
                    _ => egui::Color32::from_rgb(150, 150, 150),
                };

                plot_ui.line(Line::new(PlotPoints::from(points)).color(color).name(label));
            }
        });

        ui.separator();
        ui.horizontal(|ui| {
            ui.label(format!("Samples in view: {}", self.len()));
            if let Some((_, latest)) = self.time_series.back() {
                ui.separator();
                for (label, value) in self.labels.iter().zip(latest) {
                    ui.label(format!("{}: {:.1}µV", label, value));
                }
            }
        });
    }
}

/// Connection status, participant, output folder and segment buttons
pub struct ControlPanel;

impl ControlPanel {
    pub fn show(ui: &mut egui::Ui, app: &mut RecorderApp, status: &ServiceStatus) {
        let device_name = app.config.device_name.clone();
        let recording = status.recorder.is_recording();

        ui.heading(format!("{} Recorder", device_name));
        ui.separator();

        if status.recorder.connected() {
            ui.colored_label(
                egui::Color32::GREEN,
                format!("Status: Connected to {}", device_name),
            );
            if let Some(device) = &status.device {
                ui.small(format!(
                    "{} · {} channels @ {:.0}Hz",
                    device.name, device.channel_count, device.nominal_rate
                ));
            }
        } else {
            ui.colored_label(
                egui::Color32::RED,
                format!("Status: Not connected to {}", device_name),
            );
        }

        ui.label(format!("Stopwatch: {}", status.recorder.stopwatch));
        ui.separator();

        // The participant field only exists while the device is connected
        if status.recorder.connected() {
            ui.group(|ui| {
                ui.label("Participant ID");
                let field = egui::TextEdit::singleline(&mut app.ui_state.participant_input)
                    .hint_text("e.g. P01");
                if ui.add_enabled(!recording, field).changed() {
                    let text = app.ui_state.participant_input.clone();
                    app.set_participant(&text);
                }
            });
            ui.separator();
        }

        ui.group(|ui| {
            ui.label("Output folder");
            ui.horizontal(|ui| {
                ui.monospace(status.output_dir.display().to_string());
                if ui.add_enabled(!recording, egui::Button::new("Change…")).clicked() {
                    app.choose_output_dir();
                }
            });
        });

        ui.separator();

        ui.vertical_centered_justified(|ui| {
            for segment in &status.recorder.segments {
                let mut text = egui::RichText::new(&segment.label);
                if segment.recording {
                    text = text.color(egui::Color32::RED).strong();
                } else if segment.completed {
                    text = text.weak();
                }

                let button = egui::Button::new(text).min_size(egui::vec2(0.0, 28.0));
                if ui.add_enabled(segment.enabled, button).clicked() {
                    app.toggle_segment(&segment.key);
                }
            }
        });

        if let Some(error) = &app.ui_state.last_error {
            ui.separator();
            ui.colored_label(egui::Color32::LIGHT_RED, error);
        }

        if let Some(notice) = &status.last_notice {
            ui.separator();
            let color = if notice.is_error() {
                egui::Color32::LIGHT_RED
            } else {
                egui::Color32::LIGHT_GREEN
            };
            ui.colored_label(color, format!("{} {}", notice.at.format("%H:%M:%S"), notice.title()));
        }
    }
}

/// Controls for the simulated headband
pub struct SimulatorPanel;

impl SimulatorPanel {
    pub fn show(ui: &mut egui::Ui, app: &mut RecorderApp) {
        let Some(powered) = app.headband().map(|headband| headband.is_powered()) else {
            return;
        };

        ui.group(|ui| {
            ui.label("Simulated Headband");

            let mut on = powered;
            if ui.checkbox(&mut on, "Powered").changed() {
                app.set_headband_power(on);
            }

            let current = app.ui_state.selected_profile;
            egui::ComboBox::from_id_source("rhythm_profile_combo")
                .selected_text(current.description())
                .show_ui(ui, |ui| {
                    for (name, profile) in RhythmProfile::presets() {
                        if ui.selectable_label(profile == current, name).clicked() {
                            app.set_headband_profile(profile);
                        }
                    }
                });
        });
    }
}

/// Modal-style window for the oldest unacknowledged notice
pub struct NoticeWindow;

impl NoticeWindow {
    pub fn show(ctx: &egui::Context, ui_state: &mut UIState) {
        let Some(notice) = ui_state.pending_notices.front() else {
            return;
        };

        let mut acknowledged = false;
        egui::Window::new(notice.title())
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .show(ctx, |ui| {
                ui.label(notice.message());
                ui.add_space(8.0);
                if ui.button("OK").clicked() {
                    acknowledged = true;
                }
            });

        if acknowledged {
            ui_state.pending_notices.pop_front();
        }
    }
}
