/// Detector state: either inside a speech run or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Silence,
    Speech,
}

/// Emitted only on state transitions so subscribers never see event storms.
///
/// Timestamps are stream positions in milliseconds derived from sample
/// counts, not wall-clock readings; `SpeechStart.timestamp_ms` points at the
/// onset of the sustained run, not at the moment the debounce tripped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadEvent {
    SpeechStart {
        timestamp_ms: u64,
        energy: f32,
    },
    SpeechEnd {
        timestamp_ms: u64,
        duration_ms: u64,
        energy: f32,
    },
}

#[derive(Debug, Clone, Default)]
pub struct VadMetrics {
    pub frames_processed: u64,
    pub speech_segments: u64,
    pub total_speech_ms: u64,
    pub total_silence_ms: u64,
    pub last_energy: f32,
    pub current_threshold: f32,
}
