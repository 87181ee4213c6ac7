//! Profile settings supplied by the host application. The audio core reads
//! these; it never writes them back.

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    /// Preferred input device id; `None` lets the host pick its default.
    pub preferred_device: Option<String>,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Detector sensitivity handed to the VAD, 0.0..=1.0.
    pub vad_sensitivity: f32,
    /// BCP-47 language tag forwarded to the recognition engine.
    pub language: String,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            preferred_device: None,
            sample_rate_hz: 16_000,
            channels: 1,
            bits_per_sample: 16,
            vad_sensitivity: 0.5,
            language: "en-US".to_string(),
        }
    }
}

impl ProfileSettings {
    /// Layered load: built-in defaults, then an optional TOML file, then
    /// `SOTTO_*` environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self, AppError> {
        let defaults = Config::try_from(&ProfileSettings::default())
            .map_err(|e| AppError::Config(e.to_string()))?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("SOTTO"));

        let merged = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let settings: ProfileSettings = merged
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;
        settings.validated()
    }

    fn validated(mut self) -> Result<Self, AppError> {
        if !(0.0..=1.0).contains(&self.vad_sensitivity) {
            tracing::warn!(
                sensitivity = self.vad_sensitivity,
                "vad_sensitivity outside 0.0..=1.0, clamping"
            );
            self.vad_sensitivity = self.vad_sensitivity.clamp(0.0, 1.0);
        }
        match self.channels {
            1 | 2 => {}
            other => {
                return Err(AppError::Config(format!(
                    "unsupported channel count: {other}"
                )))
            }
        }
        match self.bits_per_sample {
            8 | 16 | 24 | 32 => Ok(self),
            other => Err(AppError::Config(format!(
                "unsupported bit depth: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_no_sources_present() {
        let settings = ProfileSettings::load(None).unwrap();
        assert_eq!(settings, ProfileSettings::default());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "preferred_device = \"front:CARD=Quad\"\nvad_sensitivity = 0.7\nlanguage = \"de-DE\""
        )
        .unwrap();

        let settings = ProfileSettings::load(Some(file.path())).unwrap();
        assert_eq!(
            settings.preferred_device.as_deref(),
            Some("front:CARD=Quad")
        );
        assert!((settings.vad_sensitivity - 0.7).abs() < f32::EPSILON);
        assert_eq!(settings.language, "de-DE");
        // Untouched keys keep their defaults
        assert_eq!(settings.sample_rate_hz, 16_000);
    }

    #[test]
    fn out_of_range_sensitivity_is_clamped() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "vad_sensitivity = 3.5").unwrap();

        let settings = ProfileSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.vad_sensitivity, 1.0);
    }

    #[test]
    fn bogus_bit_depth_is_rejected() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "bits_per_sample = 12").unwrap();

        assert!(ProfileSettings::load(Some(file.path())).is_err());
    }
}
