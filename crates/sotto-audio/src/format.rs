use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sotto_foundation::AudioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleEncoding {
    Pcm,
    Float,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub encoding: SampleEncoding,
}

impl AudioFormat {
    pub const fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
            encoding: SampleEncoding::Pcm,
        }
    }

    /// Bytes occupied by one frame (one sample per channel).
    pub const fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// A valid buffer's byte length is a multiple of the frame size.
    pub fn is_valid_buffer_len(&self, len: usize) -> bool {
        let frame = self.bytes_per_frame();
        frame > 0 && len % frame == 0
    }

    pub fn frames_in(&self, byte_len: usize) -> usize {
        byte_len / self.bytes_per_frame()
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16(16_000, 1)
    }
}

/// A raw hardware buffer as delivered by the capture layer.
///
/// The byte payload is immutable; crossing a thread boundary transfers
/// ownership (or clones the Arc), never a shared mutable view.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    data: Arc<[u8]>,
    format: AudioFormat,
    timestamp: Instant,
}

impl CaptureBuffer {
    pub fn new(data: Vec<u8>, format: AudioFormat, timestamp: Instant) -> Result<Self, AudioError> {
        if !format.is_valid_buffer_len(data.len()) {
            return Err(AudioError::MisalignedBuffer {
                len: data.len(),
                frame: format.bytes_per_frame(),
            });
        }
        Ok(Self {
            data: data.into(),
            format,
            timestamp,
        })
    }

    /// Pack i16 samples into a 16-bit little-endian buffer.
    pub fn from_samples(samples: &[i16], mut format: AudioFormat, timestamp: Instant) -> Self {
        format.bits_per_sample = 16;
        let mut data = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            data: data.into(),
            format,
            timestamp,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn frame_count(&self) -> usize {
        self.format.frames_in(self.data.len())
    }

    pub fn duration(&self) -> Duration {
        if self.format.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.format.sample_rate as f64)
    }

    /// Decode to i16 samples. Only meaningful for 16-bit PCM payloads.
    pub fn samples_i16(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}

/// A buffer after conversion and conditioning, at the pipeline's target
/// format and ready for a recognition engine.
#[derive(Debug, Clone)]
pub struct ConditionedFrame {
    pub samples: Arc<[i16]>,
    pub sample_rate: u32,
    pub timestamp: Instant,
}

impl ConditionedFrame {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}
