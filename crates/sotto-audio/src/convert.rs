//! Pure, stateless sample transforms. Every function is safe for concurrent
//! use and never fails: unsupported requests log a warning and pass the
//! input through unchanged.

use crate::format::{AudioFormat, CaptureBuffer};

/// Linear-interpolation resampling, per channel over interleaved input.
///
/// Output frame count is exactly `round(src_frames * dst_rate / src_rate)`;
/// matching rates short-circuit to a byte-identical copy.
pub fn resample(samples: &[i16], channels: u16, src_rate: u32, dst_rate: u32) -> Vec<i16> {
    if src_rate == dst_rate || samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }

    let ch = channels.max(1) as usize;
    let src_frames = samples.len() / ch;
    if src_frames == 0 {
        return samples.to_vec();
    }
    let dst_frames = (src_frames as f64 * dst_rate as f64 / src_rate as f64).round() as usize;

    let mut out = Vec::with_capacity(dst_frames * ch);
    let ratio = src_rate as f64 / dst_rate as f64;
    for i in 0..dst_frames {
        let pos = i as f64 * ratio;
        let i0 = pos.floor() as usize;
        let i0 = i0.min(src_frames - 1);
        let i1 = (i0 + 1).min(src_frames - 1);
        let frac = pos - i0 as f64;

        for c in 0..ch {
            let s0 = samples[i0 * ch + c] as f64;
            let s1 = samples[i1 * ch + c] as f64;
            out.push((s0 + (s1 - s0) * frac) as i16);
        }
    }
    out
}

/// Mono→stereo duplicates each sample; stereo→mono averages left/right with
/// truncating division. Other pairings pass through with a warning.
pub fn convert_channels(samples: &[i16], src_channels: u16, dst_channels: u16) -> Vec<i16> {
    match (src_channels, dst_channels) {
        (a, b) if a == b => samples.to_vec(),
        (1, 2) => samples.iter().flat_map(|&s| [s, s]).collect(),
        (2, 1) => samples
            .chunks_exact(2)
            .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
            .collect(),
        (src, dst) => {
            tracing::warn!(src, dst, "unsupported channel conversion, passing through");
            samples.to_vec()
        }
    }
}

/// 16-bit signed to 8-bit unsigned: `(sample + 32768) / 256`, clamped.
pub fn narrow_16_to_8(samples: &[i16]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| (((s as i32 + 32_768) / 256).clamp(0, 255)) as u8)
        .collect()
}

/// 8-bit unsigned to 16-bit signed: `(sample - 128) * 256`, clamped.
pub fn widen_8_to_16(samples: &[u8]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (((s as i32 - 128) * 256).clamp(i16::MIN as i32, i16::MAX as i32)) as i16)
        .collect()
}

/// Conform interleaved i16 samples from `src` to `target`: channel mix
/// first, then resampling. Bit depth is already 16 at this point in the
/// pipeline; other depths are the concern of `convert_bit_depth`.
pub fn conform(samples: &[i16], src: AudioFormat, target: AudioFormat) -> Vec<i16> {
    let mixed = convert_channels(samples, src.channels, target.channels);
    resample(&mixed, target.channels, src.sample_rate, target.sample_rate)
}

/// Re-quantize a raw buffer to `dst_bits`. Supported: 16<->8 and the
/// identity. Anything else logs and returns the buffer unchanged, matching
/// the degrade-gracefully contract for unsupported formats.
pub fn convert_bit_depth(buffer: &CaptureBuffer, dst_bits: u16) -> CaptureBuffer {
    let src = buffer.format();
    match (src.bits_per_sample, dst_bits) {
        (a, b) if a == b => buffer.clone(),
        (16, 8) => {
            let narrowed = narrow_16_to_8(&buffer.samples_i16());
            let format = AudioFormat {
                bits_per_sample: 8,
                ..src
            };
            CaptureBuffer::new(narrowed, format, buffer.timestamp())
                .unwrap_or_else(|_| buffer.clone())
        }
        (8, 16) => {
            let widened = widen_8_to_16(buffer.bytes());
            let format = AudioFormat {
                bits_per_sample: 16,
                ..src
            };
            CaptureBuffer::from_samples(&widened, format, buffer.timestamp())
        }
        (a, b) => {
            tracing::warn!(
                from_bits = a,
                to_bits = b,
                "unsupported bit-depth conversion, passing through"
            );
            buffer.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioFormat;

    #[test]
    fn identity_resample_is_byte_identical() {
        let input: Vec<i16> = (0..1000).map(|i| (i * 17 % 4001 - 2000) as i16).collect();
        assert_eq!(resample(&input, 1, 16_000, 16_000), input);
    }

    #[test]
    fn resampled_length_is_exact() {
        for (n, src, dst) in [
            (16_000usize, 16_000u32, 8_000u32),
            (16_000, 8_000, 16_000),
            (441, 44_100, 16_000),
            (1000, 48_000, 16_000),
            (7, 22_050, 16_000),
            (1, 44_100, 48_000),
        ] {
            let input = vec![100i16; n];
            let out = resample(&input, 1, src, dst);
            let expected = (n as f64 * dst as f64 / src as f64).round() as usize;
            assert_eq!(out.len(), expected, "{n} samples {src}->{dst}");
        }
    }

    #[test]
    fn upsampling_interpolates_between_neighbors() {
        let input = [0i16, 1000];
        let out = resample(&input, 1, 8_000, 16_000);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 500);
        assert_eq!(out[2], 1000);
    }

    #[test]
    fn stereo_resample_keeps_channels_independent() {
        // L ramps up, R stays constant
        let mut input = Vec::new();
        for i in 0..100i16 {
            input.push(i * 100);
            input.push(-5000);
        }
        let out = resample(&input, 2, 48_000, 16_000);
        assert_eq!(out.len() % 2, 0);
        for frame in out.chunks_exact(2) {
            assert_eq!(frame[1], -5000);
        }
    }

    #[test]
    fn mono_stereo_round_trip_is_exact() {
        let input: Vec<i16> = (0..512).map(|i| (i * 123 % 65536 - 32768) as i16).collect();
        let stereo = convert_channels(&input, 1, 2);
        assert_eq!(stereo.len(), input.len() * 2);
        let back = convert_channels(&stereo, 2, 1);
        assert_eq!(back, input);
    }

    #[test]
    fn stereo_downmix_truncates_toward_zero() {
        let out = convert_channels(&[3, 4, -3, -4], 2, 1);
        assert_eq!(out, vec![3, -3]);
    }

    #[test]
    fn unsupported_channel_pair_passes_through() {
        let input = vec![1i16, 2, 3, 4, 5, 6];
        assert_eq!(convert_channels(&input, 6, 2), input);
    }

    #[test]
    fn bit_depth_mapping_hits_the_rails_without_wrap() {
        assert_eq!(narrow_16_to_8(&[i16::MIN]), vec![0]);
        assert_eq!(narrow_16_to_8(&[0]), vec![128]);
        assert_eq!(narrow_16_to_8(&[i16::MAX]), vec![255]);

        assert_eq!(widen_8_to_16(&[0]), vec![-32_768]);
        assert_eq!(widen_8_to_16(&[128]), vec![0]);
        assert_eq!(widen_8_to_16(&[255]), vec![32_512]);
    }

    #[test]
    fn buffer_bit_depth_conversion_round_trips_coarsely() {
        use std::time::Instant;

        let samples = [-32_768i16, -256, 0, 256, 32_512];
        let buf =
            CaptureBuffer::from_samples(&samples, AudioFormat::pcm16(16_000, 1), Instant::now());

        let narrowed = convert_bit_depth(&buf, 8);
        assert_eq!(narrowed.format().bits_per_sample, 8);
        assert_eq!(narrowed.bytes().len(), samples.len());

        let widened = convert_bit_depth(&narrowed, 16);
        assert_eq!(widened.format().bits_per_sample, 16);
        // 8-bit quantization loses the low byte, nothing more
        for (&original, &recovered) in samples.iter().zip(widened.samples_i16().iter()) {
            assert!((original as i32 - recovered as i32).abs() <= 256);
        }
    }

    #[test]
    fn unsupported_bit_depth_passes_through() {
        use std::time::Instant;

        let buf = CaptureBuffer::from_samples(
            &[1i16, 2, 3],
            AudioFormat::pcm16(16_000, 1),
            Instant::now(),
        );
        let out = convert_bit_depth(&buf, 24);
        assert_eq!(out.bytes(), buf.bytes());
        assert_eq!(out.format().bits_per_sample, 16);
    }

    #[test]
    fn conform_reaches_target_rate_and_channels() {
        let stereo_48k: Vec<i16> = (0..960).map(|i| (i % 100) as i16).collect();
        let src = AudioFormat::pcm16(48_000, 2);
        let target = AudioFormat::pcm16(16_000, 1);
        let out = conform(&stereo_48k, src, target);
        // 480 stereo frames -> 480 mono samples -> 160 at 16kHz
        assert_eq!(out.len(), 160);
    }
}
