use serde::{Deserialize, Serialize};

use super::constants::{FRAME_SIZE_SAMPLES, SAMPLE_RATE_HZ};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VadConfig {
    /// 0.0..=1.0; higher values trip on quieter speech.
    pub sensitivity: f32,
    /// Energy must stay elevated this long before detection flips to speech.
    pub min_speech_ms: u32,
    /// Energy must stay low this long before detection flips back to silence.
    pub min_silence_ms: u32,
    /// Audio retained before a detected onset when segmenting.
    pub pre_roll_ms: u32,
    /// Audio retained after a detected offset when segmenting.
    pub post_roll_ms: u32,
    /// Normalized ambient energy assumed until `calibrate` measures one.
    pub initial_noise_floor: f32,
    pub frame_size_samples: usize,
    pub sample_rate_hz: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.5,
            min_speech_ms: 200,
            min_silence_ms: 400,
            pre_roll_ms: 150,
            post_roll_ms: 200,
            initial_noise_floor: 0.005,
            frame_size_samples: FRAME_SIZE_SAMPLES,
            sample_rate_hz: SAMPLE_RATE_HZ,
        }
    }
}

impl VadConfig {
    pub fn frame_duration_ms(&self) -> f32 {
        (self.frame_size_samples as f32 * 1000.0) / self.sample_rate_hz as f32
    }

    /// Preset for quiet rooms with a close microphone.
    pub fn quiet_room() -> Self {
        Self {
            sensitivity: 0.7,
            min_speech_ms: 150,
            min_silence_ms: 300,
            ..Default::default()
        }
    }

    /// Preset for noisy environments; slower to trigger, slower to release.
    pub fn noisy_environment() -> Self {
        Self {
            sensitivity: 0.35,
            min_speech_ms: 300,
            min_silence_ms: 500,
            initial_noise_floor: 0.02,
            ..Default::default()
        }
    }
}
