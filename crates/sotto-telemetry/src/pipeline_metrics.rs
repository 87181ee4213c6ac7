use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pipeline stages, ordered the way a buffer traverses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Capture,
    Convert,
    Condition,
    Vad,
    Output,
}

/// Shared metrics for cross-thread pipeline monitoring.
///
/// Writers are hot paths (the capture callback), so everything is an atomic;
/// the one RwLock guards a rarely-touched Instant.
#[derive(Clone)]
pub struct PipelineMetrics {
    // Audio level monitoring
    pub current_peak: Arc<AtomicI16>,   // Peak sample in current window
    pub current_rms: Arc<AtomicU64>,    // RMS * 1000 for precision
    pub audio_level_db: Arc<AtomicI16>, // Level in dB * 10

    // Stage liveness
    stage_capture: Arc<AtomicBool>,
    stage_convert: Arc<AtomicBool>,
    stage_condition: Arc<AtomicBool>,
    stage_vad: Arc<AtomicBool>,
    stage_output: Arc<AtomicBool>,

    // Frame accounting
    pub frames_captured: Arc<AtomicU64>,
    pub frames_dropped: Arc<AtomicU64>,
    pub frames_conditioned: Arc<AtomicU64>,
    pub capture_fps: Arc<AtomicU64>, // FPS * 10

    // Speech activity
    pub is_speaking: Arc<AtomicBool>,
    pub speech_segments: Arc<AtomicU64>,
    pub last_speech_time: Arc<RwLock<Option<Instant>>>,

    // Error tracking
    pub capture_errors: Arc<AtomicU64>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            current_peak: Arc::new(AtomicI16::new(0)),
            current_rms: Arc::new(AtomicU64::new(0)),
            audio_level_db: Arc::new(AtomicI16::new(-900)),

            stage_capture: Arc::new(AtomicBool::new(false)),
            stage_convert: Arc::new(AtomicBool::new(false)),
            stage_condition: Arc::new(AtomicBool::new(false)),
            stage_vad: Arc::new(AtomicBool::new(false)),
            stage_output: Arc::new(AtomicBool::new(false)),

            frames_captured: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            frames_conditioned: Arc::new(AtomicU64::new(0)),
            capture_fps: Arc::new(AtomicU64::new(0)),

            is_speaking: Arc::new(AtomicBool::new(false)),
            speech_segments: Arc::new(AtomicU64::new(0)),
            last_speech_time: Arc::new(RwLock::new(None)),

            capture_errors: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record peak/RMS/dB for an i16 window. Called once per hardware buffer.
    pub fn update_audio_level(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        let mut peak: i16 = 0;
        let mut sum_squares: i64 = 0;
        for &s in samples {
            peak = peak.max(s.saturating_abs());
            sum_squares += s as i64 * s as i64;
        }
        let rms = ((sum_squares as f64 / samples.len() as f64).sqrt() / 32768.0) as f32;

        self.current_peak.store(peak, Ordering::Relaxed);
        self.current_rms
            .store((rms * 1000.0) as u64, Ordering::Relaxed);

        let db = if rms > 1e-10 {
            20.0 * rms.log10()
        } else {
            -100.0
        };
        self.audio_level_db
            .store((db * 10.0) as i16, Ordering::Relaxed);
    }

    pub fn mark_stage_active(&self, stage: PipelineStage) {
        let flag = match stage {
            PipelineStage::Capture => &self.stage_capture,
            PipelineStage::Convert => &self.stage_convert,
            PipelineStage::Condition => &self.stage_condition,
            PipelineStage::Vad => &self.stage_vad,
            PipelineStage::Output => &self.stage_output,
        };
        flag.store(true, Ordering::Relaxed);
    }

    pub fn stage_active(&self, stage: PipelineStage) -> bool {
        let flag = match stage {
            PipelineStage::Capture => &self.stage_capture,
            PipelineStage::Convert => &self.stage_convert,
            PipelineStage::Condition => &self.stage_condition,
            PipelineStage::Vad => &self.stage_vad,
            PipelineStage::Output => &self.stage_output,
        };
        flag.load(Ordering::Relaxed)
    }

    pub fn increment_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_dropped(&self, n: u64) {
        self.frames_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_conditioned(&self) {
        self.frames_conditioned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_capture_fps(&self, fps: f64) {
        self.capture_fps
            .store((fps * 10.0) as u64, Ordering::Relaxed);
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.is_speaking.store(speaking, Ordering::Relaxed);
        if speaking {
            self.speech_segments.fetch_add(1, Ordering::Relaxed);
            *self.last_speech_time.write() = Some(Instant::now());
        }
    }

    /// Normalized RMS level in [0, 1] as last written by the pipeline.
    pub fn audio_level(&self) -> f32 {
        self.current_rms.load(Ordering::Relaxed) as f32 / 1000.0
    }
}

/// Counts events and reports a rate once per second of elapsed time.
pub struct FpsTracker {
    window_start: Instant,
    count: u32,
}

impl Default for FpsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsTracker {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Register one event; returns `Some(rate)` when a full window elapsed.
    pub fn tick(&mut self) -> Option<f64> {
        self.count += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let fps = self.count as f64 / elapsed.as_secs_f64();
            self.window_start = Instant::now();
            self.count = 0;
            Some(fps)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_update_tracks_peak_and_rms() {
        let metrics = PipelineMetrics::new();
        let full_scale = vec![32767i16; 512];
        metrics.update_audio_level(&full_scale);

        assert_eq!(metrics.current_peak.load(Ordering::Relaxed), 32767);
        // Full-scale DC has RMS ~1.0 -> ~0 dBFS
        let db = metrics.audio_level_db.load(Ordering::Relaxed);
        assert!(db.abs() < 10, "expected ~0 dBFS*10, got {db}");
        assert!(metrics.audio_level() > 0.9);
    }

    #[test]
    fn silence_reports_floor_level() {
        let metrics = PipelineMetrics::new();
        metrics.update_audio_level(&vec![0i16; 512]);
        assert_eq!(metrics.current_peak.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.audio_level_db.load(Ordering::Relaxed), -1000);
    }

    #[test]
    fn stage_flags_start_inactive() {
        let metrics = PipelineMetrics::new();
        assert!(!metrics.stage_active(PipelineStage::Vad));
        metrics.mark_stage_active(PipelineStage::Vad);
        assert!(metrics.stage_active(PipelineStage::Vad));
    }

    #[test]
    fn fps_tracker_waits_for_full_window() {
        let mut tracker = FpsTracker::new();
        for _ in 0..10 {
            assert!(tracker.tick().is_none());
        }
    }
}
