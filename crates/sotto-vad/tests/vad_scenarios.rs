//! End-to-end detector scenarios with synthetic audio.

use sotto_vad::{detect_speech_segments, EnergyVad, VadConfig, VadProcessor, VadState};

const SAMPLE_RATE: u32 = 16_000;

/// Two seconds of speech-like audio: three formant sines at 500/1500/2500 Hz
/// under a slow 2 Hz envelope, full 16kHz/16-bit/mono.
fn synthetic_speech(duration_s: f32) -> Vec<i16> {
    let n = (SAMPLE_RATE as f32 * duration_s) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let envelope = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * 2.0 * t).cos());
            let formants = 0.2 * (2.0 * std::f32::consts::PI * 500.0 * t).sin()
                + 0.2 * (2.0 * std::f32::consts::PI * 1500.0 * t).sin()
                + 0.2 * (2.0 * std::f32::consts::PI * 2500.0 * t).sin();
            (envelope * formants * 32767.0) as i16
        })
        .collect()
}

#[test]
fn synthetic_speech_is_detected() {
    let speech = synthetic_speech(2.0);
    let mut vad = EnergyVad::new(VadConfig::default());

    assert!(vad.energy_level(&speech) > 0.0);
    assert!(vad.is_speech_detected(&speech));
}

#[test]
fn all_zero_buffer_is_not_speech() {
    let silence = vec![0i16; 16_000];
    let mut vad = EnergyVad::new(VadConfig::default());

    assert_eq!(vad.energy_level(&silence), 0.0);
    assert!(!vad.is_speech_detected(&silence));
}

#[test]
fn spike_shorter_than_min_speech_does_not_flip() {
    let config = VadConfig {
        min_speech_ms: 200,
        ..Default::default()
    };
    let mut vad = EnergyVad::new(config);

    // 96ms of loud tone inside silence
    let mut buf = vec![0i16; 8000];
    let spike: Vec<i16> = (0..1536)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * 400.0 * i as f32 / SAMPLE_RATE as f32;
            (phase.sin() * 12000.0) as i16
        })
        .collect();
    buf.extend(spike);
    buf.extend(vec![0i16; 8000]);

    assert!(!vad.is_speech_detected(&buf));
    assert_eq!(vad.current_state(), VadState::Silence);
}

#[test]
fn sustained_energy_does_flip() {
    let config = VadConfig {
        min_speech_ms: 200,
        ..Default::default()
    };
    let mut vad = EnergyVad::new(config);

    // 600ms of the same tone easily clears the 200ms debounce
    let tone: Vec<i16> = (0..9600)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * 400.0 * i as f32 / SAMPLE_RATE as f32;
            (phase.sin() * 12000.0) as i16
        })
        .collect();

    assert!(vad.is_speech_detected(&tone));
}

#[test]
fn segmentation_of_synthetic_speech_holds_invariants() {
    let mut buf = vec![0i16; 8000]; // 500ms lead-in silence
    buf.extend(synthetic_speech(2.0));
    buf.extend(vec![0i16; 12_000]); // 750ms tail silence

    let segments = detect_speech_segments(&buf, SAMPLE_RATE, &VadConfig::default());
    assert!(!segments.is_empty());

    for seg in &segments {
        assert!(seg.start_ms < seg.end_ms);
        assert!(seg.confidence > 0.0 && seg.confidence <= 1.0);
        assert!(seg.average_energy > 0.0);
    }
    for pair in segments.windows(2) {
        assert!(pair[0].start_ms < pair[1].start_ms);
        assert!(pair[0].end_ms <= pair[1].start_ms);
    }
}
