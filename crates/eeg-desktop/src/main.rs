//! EEG Recorder Desktop Application - guided session capture from a Muse-style headband

mod app;
#[cfg(feature = "lsl")]
mod lsl_link;
mod recorder_service;
mod ui;

use std::path::Path;

use app::RecorderApp;
use eeg_core::{RecorderConfig, CONFIG_FILE_NAME};
use tracing::info;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config = RecorderConfig::load_or_default(Path::new(CONFIG_FILE_NAME))?;
    info!("Starting {} EEG Recorder, saving to {}",
          config.device_name, config.output_dir.display());

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([960.0, 620.0])
            .with_min_inner_size([640.0, 480.0]),
        ..Default::default()
    };

    let title = format!("{} EEG Recorder", config.device_name);
    let app = RecorderApp::new(config)?;

    eframe::run_native(
        &title,
        options,
        Box::new(|_cc| Ok(Box::new(app))),
    ).map_err(|e| anyhow::anyhow!("Failed to run native app: {}", e))?;

    Ok(())
}
