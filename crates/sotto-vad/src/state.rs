use crate::types::{VadEvent, VadState};

/// Debouncing gate between raw per-frame energy decisions and the public
/// speech/silence state.
///
/// Durations accumulate from audio time (sample counts), not wall clock, so
/// behavior is deterministic and independent of how callers slice buffers.
pub struct HysteresisGate {
    state: VadState,

    min_speech_ms: f64,
    min_silence_ms: f64,

    /// Consecutive above-threshold audio time while still in Silence.
    speech_run_ms: f64,
    /// Consecutive below-threshold audio time while still in Speech.
    silence_run_ms: f64,

    /// Total audio time observed since construction or reset.
    stream_ms: f64,
    speech_started_ms: f64,
}

impl HysteresisGate {
    pub fn new(min_speech_ms: u32, min_silence_ms: u32) -> Self {
        Self {
            state: VadState::Silence,
            min_speech_ms: min_speech_ms as f64,
            min_silence_ms: min_silence_ms as f64,
            speech_run_ms: 0.0,
            silence_run_ms: 0.0,
            stream_ms: 0.0,
            speech_started_ms: 0.0,
        }
    }

    /// Feed one frame's worth of audio time and its threshold decision.
    pub fn advance(&mut self, above_threshold: bool, frame_ms: f64, energy: f32) -> Option<VadEvent> {
        self.stream_ms += frame_ms;

        match self.state {
            VadState::Silence => {
                if above_threshold {
                    self.speech_run_ms += frame_ms;
                    self.silence_run_ms = 0.0;

                    if self.speech_run_ms >= self.min_speech_ms {
                        self.state = VadState::Speech;
                        let onset_ms = self.stream_ms - self.speech_run_ms;
                        self.speech_started_ms = onset_ms;
                        self.speech_run_ms = 0.0;

                        return Some(VadEvent::SpeechStart {
                            timestamp_ms: onset_ms.max(0.0) as u64,
                            energy,
                        });
                    }
                } else {
                    self.speech_run_ms = 0.0;
                }
            }

            VadState::Speech => {
                if !above_threshold {
                    self.silence_run_ms += frame_ms;
                    self.speech_run_ms = 0.0;

                    if self.silence_run_ms >= self.min_silence_ms {
                        self.state = VadState::Silence;
                        let offset_ms = self.stream_ms - self.silence_run_ms;
                        let duration_ms =
                            ((offset_ms - self.speech_started_ms).max(1.0)) as u64;
                        self.silence_run_ms = 0.0;

                        return Some(VadEvent::SpeechEnd {
                            timestamp_ms: offset_ms.max(0.0) as u64,
                            duration_ms,
                            energy,
                        });
                    }
                } else {
                    self.silence_run_ms = 0.0;
                }
            }
        }

        None
    }

    /// Close an open speech run at the current stream position, e.g. at end
    /// of input. No-op in Silence.
    pub fn flush(&mut self, energy: f32) -> Option<VadEvent> {
        if self.state != VadState::Speech {
            return None;
        }
        self.state = VadState::Silence;
        let offset_ms = self.stream_ms - self.silence_run_ms;
        let duration_ms = ((offset_ms - self.speech_started_ms).max(1.0)) as u64;
        self.speech_run_ms = 0.0;
        self.silence_run_ms = 0.0;

        Some(VadEvent::SpeechEnd {
            timestamp_ms: offset_ms.max(0.0) as u64,
            duration_ms,
            energy,
        })
    }

    pub fn current_state(&self) -> VadState {
        self.state
    }

    pub fn stream_position_ms(&self) -> f64 {
        self.stream_ms
    }

    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.speech_run_ms = 0.0;
        self.silence_run_ms = 0.0;
        self.stream_ms = 0.0;
        self.speech_started_ms = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: f64 = 32.0;

    #[test]
    fn starts_in_silence() {
        let gate = HysteresisGate::new(200, 400);
        assert_eq!(gate.current_state(), VadState::Silence);
    }

    #[test]
    fn onset_requires_sustained_energy() {
        let mut gate = HysteresisGate::new(100, 400);

        // 3 frames = 96ms < 100ms: still silence
        for _ in 0..3 {
            assert_eq!(gate.advance(true, FRAME_MS, 0.2), None);
            assert_eq!(gate.current_state(), VadState::Silence);
        }

        // 4th frame crosses 100ms
        match gate.advance(true, FRAME_MS, 0.2) {
            Some(VadEvent::SpeechStart { timestamp_ms, .. }) => {
                // Onset points back at the start of the run
                assert_eq!(timestamp_ms, 0);
            }
            other => panic!("expected SpeechStart, got {other:?}"),
        }
        assert_eq!(gate.current_state(), VadState::Speech);
    }

    #[test]
    fn short_spike_resets_the_run() {
        let mut gate = HysteresisGate::new(100, 400);

        gate.advance(true, FRAME_MS, 0.2);
        gate.advance(true, FRAME_MS, 0.2);
        gate.advance(false, FRAME_MS, 0.01); // spike over, run resets
        for _ in 0..3 {
            gate.advance(true, FRAME_MS, 0.2);
        }
        // Only 96ms of the new run so far
        assert_eq!(gate.current_state(), VadState::Silence);
    }

    #[test]
    fn offset_requires_sustained_silence() {
        let mut gate = HysteresisGate::new(64, 100);

        for _ in 0..3 {
            gate.advance(true, FRAME_MS, 0.2);
        }
        assert_eq!(gate.current_state(), VadState::Speech);

        for _ in 0..3 {
            assert_eq!(gate.advance(false, FRAME_MS, 0.01), None);
            assert_eq!(gate.current_state(), VadState::Speech);
        }

        match gate.advance(false, FRAME_MS, 0.01) {
            Some(VadEvent::SpeechEnd { duration_ms, .. }) => {
                assert!(duration_ms > 0);
            }
            other => panic!("expected SpeechEnd, got {other:?}"),
        }
        assert_eq!(gate.current_state(), VadState::Silence);
    }

    #[test]
    fn brief_dip_does_not_end_speech() {
        let mut gate = HysteresisGate::new(64, 100);

        for _ in 0..3 {
            gate.advance(true, FRAME_MS, 0.2);
        }
        gate.advance(false, FRAME_MS, 0.01);
        gate.advance(false, FRAME_MS, 0.01);
        gate.advance(true, FRAME_MS, 0.2); // energy back before 100ms of silence

        assert_eq!(gate.current_state(), VadState::Speech);
    }

    #[test]
    fn flush_closes_an_open_run() {
        let mut gate = HysteresisGate::new(64, 400);
        for _ in 0..4 {
            gate.advance(true, FRAME_MS, 0.2);
        }
        assert_eq!(gate.current_state(), VadState::Speech);

        match gate.flush(0.2) {
            Some(VadEvent::SpeechEnd { duration_ms, .. }) => assert!(duration_ms > 0),
            other => panic!("expected SpeechEnd, got {other:?}"),
        }
        assert_eq!(gate.current_state(), VadState::Silence);
        assert_eq!(gate.flush(0.0), None);
    }

    #[test]
    fn arbitrary_frame_sizes_accumulate_the_same() {
        // 200ms of speech delivered as one big frame flips immediately
        let mut gate = HysteresisGate::new(200, 400);
        assert!(matches!(
            gate.advance(true, 200.0, 0.3),
            Some(VadEvent::SpeechStart { .. })
        ));
    }
}
