/// RMS/dBFS measurement over i16 PCM frames.
#[derive(Debug, Clone)]
pub struct EnergyMeter {
    epsilon: f32,
}

impl EnergyMeter {
    pub fn new() -> Self {
        Self { epsilon: 1e-10 }
    }

    /// Normalized RMS in [0, 1]; 1.0 is a full-scale square wave.
    pub fn rms(&self, frame: &[i16]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }

        let sum_squares: i64 = frame
            .iter()
            .map(|&sample| {
                let s = sample as i64;
                s * s
            })
            .sum();

        let mean_square = sum_squares as f64 / frame.len() as f64;
        (mean_square.sqrt() / 32768.0) as f32
    }

    pub fn rms_to_dbfs(&self, rms: f32) -> f32 {
        if rms <= self.epsilon {
            return -100.0;
        }
        20.0 * rms.log10()
    }

    pub fn dbfs(&self, frame: &[i16]) -> f32 {
        self.rms_to_dbfs(self.rms(frame))
    }
}

impl Default for EnergyMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FRAME_SIZE_SAMPLES;

    #[test]
    fn silence_is_zero_energy_and_floor_dbfs() {
        let meter = EnergyMeter::new();
        let silence = vec![0i16; FRAME_SIZE_SAMPLES];
        assert_eq!(meter.rms(&silence), 0.0);
        assert!(meter.dbfs(&silence) <= -100.0);
    }

    #[test]
    fn full_scale_is_near_zero_dbfs() {
        let meter = EnergyMeter::new();
        let full_scale = vec![32767i16; FRAME_SIZE_SAMPLES];
        assert!(meter.dbfs(&full_scale).abs() < 0.1);
    }

    #[test]
    fn sine_rms_matches_theory() {
        let meter = EnergyMeter::new();
        let sine: Vec<i16> = (0..FRAME_SIZE_SAMPLES)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / FRAME_SIZE_SAMPLES as f32;
                (phase.sin() * 16384.0) as i16
            })
            .collect();
        // Half-scale sine: RMS = 0.5 / sqrt(2)
        assert!((meter.rms(&sine) - 0.354).abs() < 0.01);
    }

    #[test]
    fn empty_frame_is_safe() {
        let meter = EnergyMeter::new();
        assert_eq!(meter.rms(&[]), 0.0);
    }
}
