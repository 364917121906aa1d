//! EEG-Simulation: simulated headband and scripted device links
//!
//! Provides realistic EEG signal simulation for development, demos and tests.

pub mod eeg_simulator;
pub mod headband;
pub mod scripted;
pub mod signal_patterns;

pub use eeg_simulator::*;
pub use headband::*;
pub use scripted::*;
pub use signal_patterns::*;
