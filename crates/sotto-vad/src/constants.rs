//! Audio processing constants for the VAD pipeline

/// Standard sample rate for all VAD processing (Hz)
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Standard frame size for all VAD processing (samples)
/// At 16kHz, 512 samples = 32ms frames
pub const FRAME_SIZE_SAMPLES: usize = 512;

/// Standard number of channels for mono audio processing
pub const CHANNELS_MONO: u16 = 1;

/// Frame duration in milliseconds (derived constant)
pub const FRAME_DURATION_MS: f32 = (FRAME_SIZE_SAMPLES as f32 * 1000.0) / SAMPLE_RATE_HZ as f32;

// The remaining values are empirically chosen defaults; tune via `VadConfig`
// rather than treating them as load-bearing.

/// Noise floors below this are treated as this value so the activation
/// threshold never collapses to zero on dead-silent calibration input.
pub const MIN_NOISE_FLOOR: f32 = 1e-4;

/// Multiple of the noise floor the activation threshold starts from.
pub const ACTIVATION_MARGIN: f32 = 2.5;

/// How strongly ambient energy pulls the calibrated sensitivity down.
pub const AMBIENT_SENSITIVITY_SLOPE: f32 = 8.0;

/// Calibrated sensitivity is clamped to this range.
pub const CALIBRATED_SENSITIVITY_RANGE: (f32, f32) = (0.25, 0.9);

/// Energy/threshold ratio at which segment confidence saturates at 1.0.
pub const CONFIDENCE_SATURATION_RATIO: f32 = 6.0;
