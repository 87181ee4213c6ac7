//! Core types shared with recognition engine implementations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transcription event types
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionEvent {
    /// Partial transcription result (ongoing speech)
    Partial {
        session_id: u64,
        text: String,
        /// Confidence score (0.0-1.0)
        confidence: f32,
    },
    /// Final transcription result (utterance complete)
    Final {
        session_id: u64,
        text: String,
        /// Confidence score (0.0-1.0)
        confidence: f32,
        /// Optional word-level timing information
        words: Option<Vec<WordInfo>>,
    },
}

impl TranscriptionEvent {
    pub fn text(&self) -> &str {
        match self {
            TranscriptionEvent::Partial { text, .. } => text,
            TranscriptionEvent::Final { text, .. } => text,
        }
    }
}

/// Word-level timing and confidence information
#[derive(Debug, Clone, PartialEq)]
pub struct WordInfo {
    /// Start time in seconds
    pub start: f32,
    /// End time in seconds
    pub end: f32,
    /// Confidence score (0.0-1.0)
    pub conf: f32,
    /// Word text
    pub text: String,
}

/// Failure reported by the engine collaborator. `recoverable` tells the
/// session whether skipping the failed frame is safe or the session must
/// end in Failed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("recognition engine failure: {message}")]
pub struct EngineError {
    pub message: String,
    pub recoverable: bool,
}

impl EngineError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: false,
        }
    }
}

/// Recognition quality hint forwarded to the engine, never interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecognitionQuality {
    Fast,
    Balanced,
    Accurate,
}

/// Language and quality configuration for the engine collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// BCP-47 language tag, e.g. "en-US".
    pub language: String,
    pub quality: RecognitionQuality,
    /// Ask the engine for partial results while speech is ongoing.
    pub partial_results: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            quality: RecognitionQuality::Balanced,
            partial_results: true,
        }
    }
}
