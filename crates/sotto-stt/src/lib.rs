//! Recognition engine abstraction and session control for Sotto
//!
//! This crate defines the contract a speech-recognition engine fulfils to
//! receive conditioned audio, plus the session controller that composes the
//! capture pipeline, VAD, and an injected engine into a listen/stop/cancel
//! state machine.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

pub mod session;
pub mod types;

pub use session::{
    CaptureControl, SessionConfig, SessionController, SessionState, SessionTransition,
};
pub use types::{EngineConfig, EngineError, RecognitionQuality, TranscriptionEvent, WordInfo};

/// Generates unique session IDs
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique session ID
pub fn next_session_id() -> u64 {
    SESSION_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Streaming recognition interface the session controller drives.
///
/// Audio arrives as conditioned 16 kHz mono i16 PCM. Implementations may
/// emit partial events from `accept_frame` while speech is ongoing; the
/// final event comes from `finalize`.
#[async_trait]
pub trait RecognitionEngine: Send {
    /// Prepare for a new utterance with the given language/quality hints.
    async fn begin_utterance(&mut self, config: &EngineConfig) -> Result<(), EngineError>;

    /// Accept one conditioned frame; may return a partial result.
    async fn accept_frame(
        &mut self,
        samples: &[i16],
    ) -> Result<Option<TranscriptionEvent>, EngineError>;

    /// End of audio: flush and return the final result, if any.
    async fn finalize(&mut self) -> Result<Option<TranscriptionEvent>, EngineError>;

    /// Abandon any outstanding work immediately. Must not fail.
    async fn abort(&mut self);
}
