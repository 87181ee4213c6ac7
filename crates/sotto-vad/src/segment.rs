use crate::{
    config::VadConfig,
    constants::CONFIDENCE_SATURATION_RATIO,
    detector::EnergyVad,
    types::VadEvent,
    VadProcessor,
};

/// A contiguous span of detected speech inside a buffer.
///
/// Invariants: `start_ms < end_ms`, `0.0 < confidence <= 1.0`,
/// `average_energy > 0.0`. Produced sorted and non-overlapping.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub confidence: f32,
    pub average_energy: f32,
}

impl SpeechSegment {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// Slide a fresh detector across the buffer and merge adjacent speech
/// windows into segments.
///
/// Gaps shorter than `min_silence_ms` never end a segment (the hysteresis
/// gate absorbs them), so merging falls out of detection itself. Pre/post
/// roll padding is applied afterwards and clamped so the result stays
/// sorted and non-overlapping.
pub fn detect_speech_segments(
    samples: &[i16],
    sample_rate: u32,
    config: &VadConfig,
) -> Vec<SpeechSegment> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut config = config.clone();
    config.sample_rate_hz = sample_rate;
    let window = config.frame_size_samples.max(1);
    let total_ms = samples.len() as f64 * 1000.0 / sample_rate as f64;

    let mut vad = EnergyVad::new(config.clone());
    let threshold = vad.threshold();

    // (window start ms, window end ms, energy)
    let mut windows: Vec<(f64, f64, f32)> = Vec::with_capacity(samples.len() / window + 1);
    let mut raw: Vec<(f64, f64)> = Vec::new();
    let mut pending_start: Option<f64> = None;
    let mut cursor_ms = 0.0_f64;

    for chunk in samples.chunks(window) {
        let chunk_ms = chunk.len() as f64 * 1000.0 / sample_rate as f64;
        let energy = vad.energy_level(chunk);
        windows.push((cursor_ms, cursor_ms + chunk_ms, energy));

        match VadProcessor::process(&mut vad, chunk) {
            Ok(Some(VadEvent::SpeechStart { timestamp_ms, .. })) => {
                pending_start = Some(timestamp_ms as f64);
            }
            Ok(Some(VadEvent::SpeechEnd { timestamp_ms, .. })) => {
                if let Some(start) = pending_start.take() {
                    raw.push((start, timestamp_ms as f64));
                }
            }
            _ => {}
        }
        cursor_ms += chunk_ms;
    }

    // Close a run still open at end of input.
    if let Some(VadEvent::SpeechEnd { timestamp_ms, .. }) = vad.flush_open_run() {
        if let Some(start) = pending_start.take() {
            raw.push((start, timestamp_ms as f64));
        }
    }

    // Pad, then coalesce any overlaps the padding introduced.
    let pre = config.pre_roll_ms as f64;
    let post = config.post_roll_ms as f64;
    let mut padded: Vec<(f64, f64)> = Vec::with_capacity(raw.len());
    for (start, end) in raw {
        let s = (start - pre).max(0.0);
        let e = (end + post).min(total_ms);
        match padded.last_mut() {
            Some(prev) if s < prev.1 => prev.1 = prev.1.max(e),
            _ => padded.push((s, e)),
        }
    }

    padded
        .into_iter()
        .filter(|(s, e)| e > s)
        .map(|(s, e)| {
            let average_energy = span_energy(&windows, s, e);
            let ratio = average_energy / threshold;
            let confidence =
                ((ratio - 1.0) / (CONFIDENCE_SATURATION_RATIO - 1.0)).clamp(0.05, 1.0);
            SpeechSegment {
                start_ms: s as u64,
                end_ms: e.ceil() as u64,
                confidence,
                average_energy,
            }
        })
        .collect()
}

fn span_energy(windows: &[(f64, f64, f32)], start: f64, end: f64) -> f32 {
    let mut sum = 0.0_f64;
    let mut n = 0usize;
    for &(ws, we, energy) in windows {
        let mid = (ws + we) / 2.0;
        if mid >= start && mid < end {
            sum += energy as f64;
            n += 1;
        }
    }
    if n == 0 {
        0.0
    } else {
        (sum / n as f64) as f32
    }
}
