use serde::{Deserialize, Serialize};
use sotto_vad::EnergyMeter;

/// Tunable knobs for the noise gate and volume normalizer. The defaults are
/// empirically chosen starting points, not invariants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConditionerConfig {
    /// Gate strength 0.0..=1.0; 0 disables the gate entirely.
    pub gate_level: f32,
    /// RMS level the normalizer steers every buffer towards.
    pub target_dbfs: f32,
    /// Fraction of full scale, per unit of gate level, below which a sample
    /// counts as noise.
    pub gate_knee: f32,
    /// Attenuation applied to gated samples, per unit of gate level.
    pub gate_attenuation: f32,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            gate_level: 0.5,
            target_dbfs: -16.0,
            gate_knee: 0.1,
            gate_attenuation: 0.8,
        }
    }
}

/// Deterministic noise-gate + RMS normalization stage.
///
/// Both operations are pure over their inputs and safe on empty buffers.
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    config: ConditionerConfig,
    meter: EnergyMeter,
}

impl SignalConditioner {
    pub fn new(config: ConditionerConfig) -> Self {
        Self {
            config,
            meter: EnergyMeter::new(),
        }
    }

    pub fn config(&self) -> &ConditionerConfig {
        &self.config
    }

    /// Attenuate samples whose amplitude falls below the gate threshold.
    /// A level of zero (or below) is an exact identity.
    pub fn reduce_noise(&self, samples: &[i16], level: f32) -> Vec<i16> {
        if level <= 0.0 || samples.is_empty() {
            return samples.to_vec();
        }
        let level = level.min(1.0);
        let threshold = self.config.gate_knee * level * i16::MAX as f32;
        let attenuation = 1.0 - self.config.gate_attenuation * level;

        samples
            .iter()
            .map(|&s| {
                if (s as f32).abs() < threshold {
                    (s as f32 * attenuation) as i16
                } else {
                    s
                }
            })
            .collect()
    }

    /// Scale the buffer so its RMS lands on `target_dbfs`, clamping every
    /// output sample into the signed 16-bit range. Silent buffers pass
    /// through since no finite gain reaches the target.
    pub fn normalize_volume(&self, samples: &[i16], target_dbfs: f32) -> Vec<i16> {
        if samples.is_empty() {
            return Vec::new();
        }
        let rms = self.meter.rms(samples);
        if rms <= 0.0 {
            return samples.to_vec();
        }

        let current_dbfs = self.meter.rms_to_dbfs(rms);
        let gain = 10f32.powf((target_dbfs - current_dbfs) / 20.0);

        samples
            .iter()
            .map(|&s| {
                (s as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16
            })
            .collect()
    }

    /// The full conditioning chain in pipeline order: gate, then normalize.
    pub fn condition(&self, samples: &[i16]) -> Vec<i16> {
        let gated = self.reduce_noise(samples, self.config.gate_level);
        self.normalize_volume(&gated, self.config.target_dbfs)
    }
}

impl Default for SignalConditioner {
    fn default() -> Self {
        Self::new(ConditionerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conditioner() -> SignalConditioner {
        SignalConditioner::default()
    }

    #[test]
    fn zero_gate_level_is_identity() {
        let c = conditioner();
        let input: Vec<i16> = (-50..50).map(|i| i * 300).collect();
        assert_eq!(c.reduce_noise(&input, 0.0), input);
        assert_eq!(c.reduce_noise(&input, -1.0), input);
    }

    #[test]
    fn gate_attenuates_only_quiet_samples() {
        let c = conditioner();
        // level 1.0: threshold = 0.1 * 32767 ≈ 3276, attenuation = 0.2
        let out = c.reduce_noise(&[100, -200, 3000, 10_000, -20_000], 1.0);
        assert_eq!(out[0], 20);
        assert_eq!(out[1], -40);
        assert_eq!(out[2], 600);
        assert_eq!(out[3], 10_000);
        assert_eq!(out[4], -20_000);
    }

    #[test]
    fn gate_is_safe_on_empty_input() {
        let c = conditioner();
        assert!(c.reduce_noise(&[], 0.8).is_empty());
        assert!(c.normalize_volume(&[], -16.0).is_empty());
    }

    #[test]
    fn normalization_raises_quiet_audio() {
        let c = conditioner();
        let quiet: Vec<i16> = (0..512)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / 64.0;
                (phase.sin() * 500.0) as i16
            })
            .collect();
        let out = c.normalize_volume(&quiet, -16.0);
        let peak_in = quiet.iter().map(|s| s.abs()).max().unwrap();
        let peak_out = out.iter().map(|s| s.abs()).max().unwrap();
        assert!(peak_out > peak_in);
    }

    #[test]
    fn normalization_never_leaves_the_representable_range() {
        let c = conditioner();
        // Near-full-scale input pushed towards a hot target must clamp, not wrap
        let loud: Vec<i16> = (0..512)
            .map(|i| if i % 2 == 0 { 30_000 } else { -30_000 })
            .collect();
        let out = c.normalize_volume(&loud, 0.0);
        for &s in &out {
            assert!((i16::MIN..=i16::MAX).contains(&s));
        }
        // And the direction of the gain is still towards the target
        assert!(out.iter().any(|&s| s == i16::MAX || s == i16::MIN));
    }

    #[test]
    fn silent_buffer_passes_through_normalization() {
        let c = conditioner();
        let silence = vec![0i16; 256];
        assert_eq!(c.normalize_volume(&silence, -16.0), silence);
    }

    #[test]
    fn normalized_rms_approaches_target() {
        let c = conditioner();
        let tone: Vec<i16> = (0..4096)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / 128.0;
                (phase.sin() * 2000.0) as i16
            })
            .collect();
        let out = c.normalize_volume(&tone, -16.0);
        let meter = EnergyMeter::new();
        let dbfs = meter.dbfs(&out);
        assert!((dbfs + 16.0).abs() < 1.0, "got {dbfs} dBFS");
    }
}
