use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;

use sotto_foundation::AudioError;

/// Snapshot of one input device at enumeration time. Never cached: listing
/// reflects only hardware that is live right now.
///
/// cpal exposes no mixer control, so `volume`/`is_muted` report the neutral
/// 100/unmuted values; they stay in the model because profile settings
/// round-trip them.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub is_enabled: bool,
    pub is_input: bool,
    pub volume: u8,
    pub is_muted: bool,
}

pub struct DeviceManager {
    host: Host,
}

impl DeviceManager {
    pub fn new() -> Result<Self, AudioError> {
        Ok(Self {
            host: cpal::default_host(),
        })
    }

    pub fn host_id(&self) -> cpal::HostId {
        self.host.id()
    }

    /// Enumerate currently active input devices, marking the host default.
    /// Devices without a usable input config are listed but disabled.
    pub fn list_input_devices(&self) -> Vec<AudioDevice> {
        let mut devices = Vec::new();

        if let Ok(inputs) = self.host.input_devices() {
            for device in inputs {
                if let Ok(name) = device.name() {
                    let usable = device
                        .supported_input_configs()
                        .map(|mut cfgs| cfgs.next().is_some())
                        .unwrap_or(false);
                    devices.push(AudioDevice {
                        id: name.clone(),
                        name,
                        is_default: false,
                        is_enabled: usable,
                        is_input: true,
                        volume: 100,
                        is_muted: false,
                    });
                }
            }
        }

        if let Some(default) = self.host.default_input_device() {
            if let Ok(default_name) = default.name() {
                for device in &mut devices {
                    if device.name == default_name {
                        device.is_default = true;
                    }
                }
            }
        }

        devices
    }

    pub fn default_input_device(&self) -> Option<AudioDevice> {
        let name = self.host.default_input_device()?.name().ok()?;
        Some(AudioDevice {
            id: name.clone(),
            name,
            is_default: true,
            is_enabled: true,
            is_input: true,
            volume: 100,
            is_muted: false,
        })
    }

    pub fn default_input_device_name(&self) -> Option<String> {
        self.host.default_input_device().and_then(|d| d.name().ok())
    }

    /// Resolve a device handle: exact name match, then case-insensitive
    /// substring, then the host default. A named request that matches
    /// nothing is an error rather than a silent fallback.
    pub fn open_device(&self, name: Option<&str>) -> Result<Device, AudioError> {
        if let Some(wanted) = name {
            if let Some(device) = self.find_device_by_name(wanted) {
                return Ok(device);
            }
            if let Some(device) = self
                .find_device_by_predicate(|n| n.to_lowercase().contains(&wanted.to_lowercase()))
            {
                tracing::warn!(
                    requested = wanted,
                    matched = device.name().unwrap_or_default(),
                    "device not found exactly, using closest match"
                );
                return Ok(device);
            }
            return Err(AudioError::DeviceNotFound {
                name: Some(wanted.to_string()),
            });
        }

        self.host
            .default_input_device()
            .ok_or(AudioError::DeviceNotFound { name: None })
    }

    /// Open the device for `duration`, confirm the signal has non-zero
    /// variance, and release it. The stream handle is scoped to this call,
    /// so the device is released on every exit path.
    pub fn test_input_device(
        &self,
        device: &AudioDevice,
        duration: Duration,
    ) -> Result<bool, AudioError> {
        let handle = self.open_device(Some(&device.id))?;
        let (config, sample_format) = negotiate_config(&handle)?;

        #[derive(Default)]
        struct Moments {
            sum: f64,
            sum_squares: f64,
            count: u64,
        }
        let moments = Arc::new(Mutex::new(Moments::default()));
        let sink = Arc::clone(&moments);
        let record = move |samples: &[f32]| {
            let mut m = sink.lock();
            for &s in samples {
                m.sum += s as f64;
                m.sum_squares += s as f64 * s as f64;
                m.count += 1;
            }
        };

        let err_fn = |err: cpal::StreamError| {
            tracing::warn!("stream error during device test: {err}");
        };

        let stream = match sample_format {
            SampleFormat::F32 => handle.build_input_stream(
                &config,
                move |data: &[f32], _: &_| record(data),
                err_fn,
                None,
            )?,
            SampleFormat::I16 => handle.build_input_stream(
                &config,
                move |data: &[i16], _: &_| {
                    let scaled: Vec<f32> =
                        data.iter().map(|&s| s as f32 / 32_768.0).collect();
                    record(&scaled);
                },
                err_fn,
                None,
            )?,
            SampleFormat::U16 => handle.build_input_stream(
                &config,
                move |data: &[u16], _: &_| {
                    let scaled: Vec<f32> = data
                        .iter()
                        .map(|&s| (s as i32 - 32_768) as f32 / 32_768.0)
                        .collect();
                    record(&scaled);
                },
                err_fn,
                None,
            )?,
            other => {
                return Err(AudioError::FormatUnsupported {
                    details: format!("{other:?}"),
                });
            }
        };

        stream.play()?;
        std::thread::sleep(duration);
        drop(stream);

        let m = moments.lock();
        if m.count == 0 {
            return Ok(false);
        }
        let mean = m.sum / m.count as f64;
        let variance = m.sum_squares / m.count as f64 - mean * mean;
        Ok(variance > 1e-12)
    }

    fn find_device_by_name(&self, name: &str) -> Option<Device> {
        if let Ok(devices) = self.host.input_devices() {
            for device in devices {
                if let Ok(device_name) = device.name() {
                    if device_name == name {
                        return Some(device);
                    }
                }
            }
        }
        None
    }

    fn find_device_by_predicate<F>(&self, pred: F) -> Option<Device>
    where
        F: Fn(&str) -> bool,
    {
        if let Ok(devices) = self.host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name() {
                    if pred(&name) {
                        return Some(device);
                    }
                }
            }
        }
        None
    }
}

/// Pick a stream config: the device default when available, otherwise the
/// first supported config at its maximum rate.
pub(crate) fn negotiate_config(
    device: &Device,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    if let Ok(default_config) = device.default_input_config() {
        return Ok((
            StreamConfig {
                channels: default_config.channels(),
                sample_rate: default_config.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            },
            default_config.sample_format(),
        ));
    }

    if let Ok(configs) = device.supported_input_configs() {
        if let Some(config) = configs.into_iter().next() {
            return Ok((config.with_max_sample_rate().into(), config.sample_format()));
        }
    }

    Err(AudioError::FormatUnsupported {
        details: "no supported input configs".to_string(),
    })
}
