use crate::{
    config::VadConfig,
    constants::{
        ACTIVATION_MARGIN, AMBIENT_SENSITIVITY_SLOPE, CALIBRATED_SENSITIVITY_RANGE,
        MIN_NOISE_FLOOR,
    },
    energy::EnergyMeter,
    state::HysteresisGate,
    types::{VadEvent, VadMetrics, VadState},
    VadProcessor,
};

/// Energy-threshold voice activity detector.
///
/// Compares windowed RMS energy against a sensitivity-scaled threshold over
/// the calibrated noise floor, then debounces the decision through a
/// hysteresis gate so short transients never flip the state.
pub struct EnergyVad {
    config: VadConfig,
    meter: EnergyMeter,
    gate: HysteresisGate,
    noise_floor: f32,
    metrics: VadMetrics,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        let mut config = config;
        config.sensitivity = config.sensitivity.clamp(0.0, 1.0);
        Self {
            gate: HysteresisGate::new(config.min_speech_ms, config.min_silence_ms),
            meter: EnergyMeter::new(),
            noise_floor: config.initial_noise_floor.max(MIN_NOISE_FLOOR),
            metrics: VadMetrics::default(),
            config,
        }
    }

    /// Convenience constructor covering the three knobs callers most often
    /// set together.
    pub fn with_tuning(sensitivity: f32, min_speech_ms: u32, min_silence_ms: u32) -> Self {
        Self::new(VadConfig {
            sensitivity,
            min_speech_ms,
            min_silence_ms,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    pub fn sensitivity(&self) -> f32 {
        self.config.sensitivity
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.config.sensitivity = sensitivity.clamp(0.0, 1.0);
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    /// Current activation threshold in normalized energy units.
    ///
    /// At sensitivity 1.0 the threshold sits `ACTIVATION_MARGIN` above the
    /// noise floor; at 0.0 it doubles.
    pub fn threshold(&self) -> f32 {
        let floor = self.noise_floor.max(MIN_NOISE_FLOOR);
        floor * ACTIVATION_MARGIN * (2.0 - self.config.sensitivity)
    }

    /// Normalized RMS of the buffer, clamped to [0, 1].
    pub fn energy_level(&self, buffer: &[i16]) -> f32 {
        self.meter.rms(buffer).clamp(0.0, 1.0)
    }

    /// Run the whole buffer through the detector and report whether it ends
    /// inside a speech run. Windows of `frame_size_samples` are processed in
    /// order; a trailing partial window still counts its audio time.
    pub fn is_speech_detected(&mut self, buffer: &[i16]) -> bool {
        for window in buffer.chunks(self.config.frame_size_samples.max(1)) {
            // Window sizes are bounded; errors cannot occur here.
            let _ = VadProcessor::process(self, window);
        }
        self.gate.current_state() == VadState::Speech
    }

    /// Sample known ambient (non-speech) audio, adopt its energy as the
    /// noise floor, and return a sensitivity that keeps that ambient level
    /// safely below the resulting threshold.
    pub fn calibrate(&mut self, background: &[i16]) -> f32 {
        let ambient = self.meter.rms(background);
        self.noise_floor = ambient.max(MIN_NOISE_FLOOR);

        let (lo, hi) = CALIBRATED_SENSITIVITY_RANGE;
        let sensitivity = (1.0 - ambient * AMBIENT_SENSITIVITY_SLOPE).clamp(lo, hi);
        self.config.sensitivity = sensitivity;
        sensitivity
    }

    /// Close an open speech run at the current stream position, as at end
    /// of input. Returns the closing event, if any.
    pub fn flush_open_run(&mut self) -> Option<VadEvent> {
        let energy = self.metrics.last_energy;
        self.gate.flush(energy)
    }

    pub fn metrics(&self) -> &VadMetrics {
        &self.metrics
    }

    fn update_metrics(&mut self, energy: f32, frame_ms: f64, event: Option<&VadEvent>) {
        self.metrics.frames_processed += 1;
        self.metrics.last_energy = energy;
        self.metrics.current_threshold = self.threshold();

        match self.gate.current_state() {
            VadState::Speech => self.metrics.total_speech_ms += frame_ms as u64,
            VadState::Silence => self.metrics.total_silence_ms += frame_ms as u64,
        }

        if let Some(VadEvent::SpeechStart { .. }) = event {
            self.metrics.speech_segments += 1;
        }
    }
}

impl VadProcessor for EnergyVad {
    fn process(&mut self, frame: &[i16]) -> Result<Option<VadEvent>, String> {
        if frame.is_empty() {
            return Ok(None);
        }

        let energy = self.meter.rms(frame);
        let above = energy >= self.threshold();
        let frame_ms = frame.len() as f64 * 1000.0 / self.config.sample_rate_hz as f64;

        let event = self.gate.advance(above, frame_ms, energy);
        self.update_metrics(energy, frame_ms, event.as_ref());

        Ok(event)
    }

    fn reset(&mut self) {
        self.gate.reset();
        self.noise_floor = self.config.initial_noise_floor.max(MIN_NOISE_FLOOR);
        self.metrics = VadMetrics::default();
    }

    fn current_state(&self) -> VadState {
        self.gate.current_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FRAME_SIZE_SAMPLES;

    fn speech_frame(amplitude: f32) -> Vec<i16> {
        (0..FRAME_SIZE_SAMPLES)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0;
                (phase.sin() * amplitude * 32767.0) as i16
            })
            .collect()
    }

    #[test]
    fn zero_buffer_has_zero_energy() {
        let vad = EnergyVad::new(VadConfig::default());
        assert_eq!(vad.energy_level(&vec![0i16; 16000]), 0.0);
    }

    #[test]
    fn empty_frame_is_a_no_op() {
        let mut vad = EnergyVad::new(VadConfig::default());
        assert_eq!(VadProcessor::process(&mut vad, &[]).unwrap(), None);
        assert_eq!(vad.metrics().frames_processed, 0);
    }

    #[test]
    fn silence_never_triggers() {
        let mut vad = EnergyVad::new(VadConfig::default());
        let silence = vec![0i16; FRAME_SIZE_SAMPLES];

        for _ in 0..100 {
            let event = VadProcessor::process(&mut vad, &silence).unwrap();
            assert!(event.is_none());
        }
        assert_eq!(VadProcessor::current_state(&vad), VadState::Silence);
        assert_eq!(vad.metrics().speech_segments, 0);
        assert!(vad.metrics().total_silence_ms > 0);
    }

    #[test]
    fn sustained_tone_starts_and_ends_speech() {
        let mut vad = EnergyVad::with_tuning(0.5, 60, 80);
        let frame = speech_frame(0.25);

        let mut started = false;
        for _ in 0..10 {
            if let Some(VadEvent::SpeechStart { .. }) =
                VadProcessor::process(&mut vad, &frame).unwrap()
            {
                started = true;
            }
        }
        assert!(started);
        assert_eq!(VadProcessor::current_state(&vad), VadState::Speech);

        let silence = vec![0i16; FRAME_SIZE_SAMPLES];
        let mut ended = false;
        for _ in 0..10 {
            if let Some(VadEvent::SpeechEnd { duration_ms, .. }) =
                VadProcessor::process(&mut vad, &silence).unwrap()
            {
                assert!(duration_ms > 0);
                ended = true;
            }
        }
        assert!(ended);
        assert_eq!(VadProcessor::current_state(&vad), VadState::Silence);
    }

    #[test]
    fn higher_sensitivity_lowers_the_threshold() {
        let mut vad = EnergyVad::new(VadConfig::default());
        vad.set_sensitivity(0.2);
        let strict = vad.threshold();
        vad.set_sensitivity(0.9);
        let lax = vad.threshold();
        assert!(lax < strict);
    }

    #[test]
    fn calibration_adapts_to_room_noise() {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        let quiet: Vec<i16> = (0..16000)
            .map(|_| ((rng.gen::<f32>() - 0.5) * 60.0) as i16)
            .collect();
        let noisy: Vec<i16> = (0..16000)
            .map(|_| ((rng.gen::<f32>() - 0.5) * 4000.0) as i16)
            .collect();

        let mut vad_quiet = EnergyVad::new(VadConfig::default());
        let s_quiet = vad_quiet.calibrate(&quiet);

        let mut vad_noisy = EnergyVad::new(VadConfig::default());
        let s_noisy = vad_noisy.calibrate(&noisy);

        assert!(
            s_quiet > s_noisy,
            "quiet rooms should calibrate more sensitive ({s_quiet} vs {s_noisy})"
        );

        // Ambient level must land below the post-calibration threshold
        let meter = EnergyMeter::new();
        assert!(meter.rms(&quiet) < vad_quiet.threshold());
        assert!(meter.rms(&noisy) < vad_noisy.threshold());
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut vad = EnergyVad::with_tuning(0.5, 60, 80);
        let frame = speech_frame(0.25);
        for _ in 0..10 {
            VadProcessor::process(&mut vad, &frame).unwrap();
        }
        assert!(vad.metrics().frames_processed > 0);

        VadProcessor::reset(&mut vad);
        assert_eq!(vad.metrics().frames_processed, 0);
        assert_eq!(VadProcessor::current_state(&vad), VadState::Silence);
    }
}
