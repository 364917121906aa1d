//! EEG signal simulator producing Muse-style samples

use eeg_core::{RecorderError, RecorderResult, Sample, MUSE_CHANNEL_LABELS};
use crate::signal_patterns::RhythmProfile;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Configuration for EEG simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EEGConfig {
    /// Sampling rate in Hz
    pub sampling_rate: f32,
    /// Number of channels to simulate
    pub channel_count: usize,
    /// Brain-state profile
    pub profile: RhythmProfile,
    /// Noise configuration
    pub noise: NoiseConfig,
    /// Power line interference (50/60Hz)
    pub powerline_freq: Option<f32>,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

/// Noise configuration for realistic EEG simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Gaussian noise standard deviation in µV (0.0 = no noise)
    pub gaussian_std: f32,
    /// Probability per sample that an eye blink starts
    pub blink_prob: f32,
    /// Blink artifact peak in µV, strongest on frontal channels
    pub blink_amp: f32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            gaussian_std: 3.0,
            blink_prob: 0.001,
            blink_amp: 120.0,
        }
    }
}

impl Default for EEGConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 256.0,
            channel_count: MUSE_CHANNEL_LABELS.len(),
            profile: RhythmProfile::EyesOpen,
            noise: NoiseConfig::default(),
            powerline_freq: Some(50.0),
            seed: None,
        }
    }
}

/// Blink artifact length in seconds
const BLINK_DURATION: f32 = 0.3;

/// EEG signal simulator
pub struct EEGSimulator {
    config: EEGConfig,
    rng: rand::rngs::StdRng,
    normal_dist: Normal<f32>,
    sample_index: u64,
    /// Start time of the current blink, if one is in progress
    blink_started: Option<f32>,
}

impl EEGSimulator {
    /// Create new EEG simulator with configuration
    pub fn new(config: EEGConfig) -> RecorderResult<Self> {
        Self::validate(&config)?;

        let seed = config.seed.unwrap_or_else(rand::random::<u64>);
        let rng = rand::rngs::StdRng::seed_from_u64(seed);
        let normal_dist = Normal::new(0.0, config.noise.gaussian_std)
            .map_err(|e| RecorderError::Configuration {
                message: format!("Failed to create normal distribution: {}", e),
            })?;

        Ok(EEGSimulator {
            config,
            rng,
            normal_dist,
            sample_index: 0,
            blink_started: None,
        })
    }

    fn validate(config: &EEGConfig) -> RecorderResult<()> {
        if !(config.sampling_rate > 0.0) {
            return Err(RecorderError::Configuration {
                message: format!("Sampling rate must be positive, got {}", config.sampling_rate),
            });
        }
        if config.channel_count == 0 {
            return Err(RecorderError::Configuration {
                message: "At least one channel is required".to_string(),
            });
        }
        Ok(())
    }

    /// Time of the next sample relative to the simulation start
    pub fn current_time(&self) -> f64 {
        self.sample_index as f64 / self.config.sampling_rate as f64
    }

    /// Generate the next sample; `clock_offset` is added to its timestamp
    pub fn next_sample(&mut self, clock_offset: f64) -> Sample {
        let time = self.current_time();
        let t = time as f32;
        let blink = self.blink_component(t);

        let mut channels = Vec::with_capacity(self.config.channel_count);
        for channel_idx in 0..self.config.channel_count {
            let mut value = self.config.profile.value_at_time(t, channel_idx);

            // Gaussian noise
            value += self.normal_dist.sample(&mut self.rng);

            // Blinks dominate AF7/AF8
            if matches!(channel_idx, 1 | 2) {
                value += blink;
            } else {
                value += blink * 0.1;
            }

            if let Some(powerline_freq) = self.config.powerline_freq {
                value += 2.0 * (2.0 * std::f32::consts::PI * powerline_freq * t).sin();
            }

            channels.push(value);
        }

        self.sample_index += 1;
        Sample::new(clock_offset + time, channels)
    }

    /// Half-sine blink bump, started at random
    fn blink_component(&mut self, time: f32) -> f32 {
        if self.blink_started.is_none() && self.rng.gen::<f32>() < self.config.noise.blink_prob {
            self.blink_started = Some(time);
        }

        match self.blink_started {
            Some(start) if time - start < BLINK_DURATION => {
                let phase = (time - start) / BLINK_DURATION;
                self.config.noise.blink_amp * (std::f32::consts::PI * phase).sin()
            }
            Some(_) => {
                self.blink_started = None;
                0.0
            }
            None => 0.0,
        }
    }

    /// Advance the simulation clock without generating samples
    pub fn skip(&mut self, count: u64) {
        self.sample_index += count;
        self.blink_started = None;
    }

    pub fn set_profile(&mut self, profile: RhythmProfile) {
        self.config.profile = profile;
    }

    /// Get current configuration
    pub fn config(&self) -> &EEGConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> EEGConfig {
        EEGConfig {
            seed: Some(7),
            ..Default::default()
        }
    }

    fn take(simulator: &mut EEGSimulator, count: usize) -> Vec<Sample> {
        (0..count).map(|_| simulator.next_sample(0.0)).collect()
    }

    #[test]
    fn test_eeg_simulator_basic() {
        let mut simulator = EEGSimulator::new(seeded()).unwrap();
        let samples = take(&mut simulator, 256);

        assert_eq!(samples.len(), 256);
        assert!(samples.iter().all(|s| s.channel_count() == 5));
        assert_eq!(samples[0].timestamp, 0.0);
        assert!((samples[255].timestamp - 255.0 / 256.0).abs() < 1e-9);
        assert!((simulator.current_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_timestamps_use_clock_offset() {
        let mut simulator = EEGSimulator::new(seeded()).unwrap();
        let sample = simulator.next_sample(1_000.0);
        assert_eq!(sample.timestamp, 1_000.0);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = take(&mut EEGSimulator::new(seeded()).unwrap(), 32);
        let b = take(&mut EEGSimulator::new(seeded()).unwrap(), 32);
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = seeded();
        config.sampling_rate = 0.0;
        assert!(EEGSimulator::new(config).is_err());

        let mut config = seeded();
        config.channel_count = 0;
        assert!(EEGSimulator::new(config).is_err());
    }

    #[test]
    fn test_skip_advances_clock() {
        let mut simulator = EEGSimulator::new(seeded()).unwrap();
        simulator.skip(512);
        assert_eq!(simulator.next_sample(0.0).timestamp, 2.0);
    }
}
