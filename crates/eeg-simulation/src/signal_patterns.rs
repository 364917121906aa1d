//! Pre-defined EEG rhythm profiles for realistic simulation

use std::f32::consts::PI;
use serde::{Deserialize, Serialize};

/// Centre frequencies (Hz) of the simulated bands
const DELTA_HZ: f32 = 2.0;
const THETA_HZ: f32 = 6.0;
const ALPHA_HZ: f32 = 10.0;
const BETA_HZ: f32 = 20.0;

/// Predefined brain-state profiles
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RhythmProfile {
    /// Relaxed with eyes closed: strong posterior alpha
    EyesClosed,
    /// Eyes open: alpha suppressed, more beta
    EyesOpen,
    /// Reading or answering questions: beta dominant with frontal theta
    Task,
    /// Custom band amplitudes in µV
    Custom {
        delta: f32,
        theta: f32,
        alpha: f32,
        beta: f32,
    },
}

/// Band amplitudes in µV
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandAmplitudes {
    pub delta: f32,
    pub theta: f32,
    pub alpha: f32,
    pub beta: f32,
}

impl RhythmProfile {
    pub fn amplitudes(&self) -> BandAmplitudes {
        match *self {
            RhythmProfile::EyesClosed => BandAmplitudes { delta: 8.0, theta: 6.0, alpha: 30.0, beta: 4.0 },
            RhythmProfile::EyesOpen => BandAmplitudes { delta: 8.0, theta: 5.0, alpha: 8.0, beta: 8.0 },
            RhythmProfile::Task => BandAmplitudes { delta: 6.0, theta: 10.0, alpha: 6.0, beta: 12.0 },
            RhythmProfile::Custom { delta, theta, alpha, beta } => BandAmplitudes { delta, theta, alpha, beta },
        }
    }

    /// Rhythmic component at `time` for one channel.
    ///
    /// Temporal electrodes (TP9/TP10, even indices below 4) carry more alpha
    /// than frontal ones; each channel gets a small phase offset.
    pub fn value_at_time(&self, time: f32, channel_idx: usize) -> f32 {
        let bands = self.amplitudes();
        let phase = channel_idx as f32 * 0.7;
        let alpha_gain = match channel_idx {
            0 | 3 => 1.0,
            1 | 2 => 0.6,
            _ => 0.3,
        };

        bands.delta * (2.0 * PI * DELTA_HZ * time + phase).sin()
            + bands.theta * (2.0 * PI * THETA_HZ * time + phase).sin()
            + bands.alpha * alpha_gain * (2.0 * PI * ALPHA_HZ * time + phase).sin()
            + bands.beta * (2.0 * PI * BETA_HZ * time + phase).sin()
    }

    /// Get profile description
    pub fn description(&self) -> &'static str {
        match self {
            RhythmProfile::EyesClosed => "Eyes closed (alpha)",
            RhythmProfile::EyesOpen => "Eyes open",
            RhythmProfile::Task => "Task engagement",
            RhythmProfile::Custom { .. } => "Custom bands",
        }
    }

    /// Profiles offered in the simulator controls
    pub fn presets() -> Vec<(&'static str, RhythmProfile)> {
        vec![
            ("Eyes Closed", RhythmProfile::EyesClosed),
            ("Eyes Open", RhythmProfile::EyesOpen),
            ("Task", RhythmProfile::Task),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpha_power(profile: RhythmProfile) -> f32 {
        profile.amplitudes().alpha
    }

    #[test]
    fn test_eyes_closed_has_more_alpha() {
        assert!(alpha_power(RhythmProfile::EyesClosed) > alpha_power(RhythmProfile::EyesOpen));
        assert!(alpha_power(RhythmProfile::EyesClosed) > alpha_power(RhythmProfile::Task));
    }

    #[test]
    fn test_values_are_bounded() {
        let profile = RhythmProfile::EyesClosed;
        let bands = profile.amplitudes();
        let bound = bands.delta + bands.theta + bands.alpha + bands.beta;
        for i in 0..512 {
            let t = i as f32 / 256.0;
            for ch in 0..5 {
                assert!(profile.value_at_time(t, ch).abs() <= bound + 1e-3);
            }
        }
    }
}
