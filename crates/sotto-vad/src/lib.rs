pub mod config;
pub mod constants;
pub mod detector;
pub mod energy;
pub mod segment;
pub mod state;
pub mod types;

// Core exports - grouped and sorted alphabetically
pub use config::VadConfig;
pub use constants::{FRAME_DURATION_MS, FRAME_SIZE_SAMPLES, SAMPLE_RATE_HZ};
pub use detector::EnergyVad;
pub use energy::EnergyMeter;
pub use segment::{detect_speech_segments, SpeechSegment};
pub use types::{VadEvent, VadMetrics, VadState};

/// Main VAD trait for processing audio frames
pub trait VadProcessor: Send {
    fn process(&mut self, frame: &[i16]) -> Result<Option<VadEvent>, String>;
    fn reset(&mut self);
    fn current_state(&self) -> VadState;
}
