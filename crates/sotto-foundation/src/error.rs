use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Audio subsystem error: {0}")]
    Audio(#[from] AudioError),

    #[error("Recognition session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {name:?}")]
    DeviceNotFound { name: Option<String> },

    #[error("Device unavailable: {name}")]
    DeviceUnavailable { name: String },

    #[error("Capture already active on this pipeline")]
    CaptureAlreadyActive,

    #[error("Format not supported: {details}")]
    FormatUnsupported { details: String },

    #[error("Buffer length {len} is not a multiple of the {frame} byte frame size")]
    MisalignedBuffer { len: usize, frame: usize },

    #[error("No audio data for {duration:?}")]
    NoDataTimeout { duration: Duration },

    #[error("CPAL error: {0}")]
    Cpal(#[from] cpal::StreamError),

    #[error("Build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Supported stream configs error: {0}")]
    SupportedStreamConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("Device enumeration error: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Recognition engine failed: {message}")]
    Engine { message: String, recoverable: bool },

    #[error("Recognition did not finish within {limit:?}")]
    Timeout { limit: Duration },

    #[error("Audio subsystem error: {0}")]
    Audio(#[from] AudioError),
}

#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    Retry { max_attempts: u32, delay: Duration },
    Reenumerate,
    Passthrough,
    Ignore,
    Fatal,
}

impl AppError {
    /// Map the error taxonomy onto a recovery action the caller can take
    /// without inspecting variant internals.
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            AppError::Audio(AudioError::DeviceUnavailable { .. })
            | AppError::Audio(AudioError::DeviceNotFound { .. }) => RecoveryStrategy::Reenumerate,
            AppError::Audio(AudioError::FormatUnsupported { .. }) => RecoveryStrategy::Passthrough,
            AppError::Audio(AudioError::CaptureAlreadyActive) => RecoveryStrategy::Ignore,
            AppError::Audio(AudioError::NoDataTimeout { .. }) => RecoveryStrategy::Retry {
                max_attempts: 3,
                delay: Duration::from_secs(1),
            },
            AppError::Session(SessionError::Timeout { .. }) => RecoveryStrategy::Retry {
                max_attempts: 2,
                delay: Duration::from_millis(500),
            },
            AppError::Session(SessionError::Engine { recoverable, .. }) => {
                if *recoverable {
                    RecoveryStrategy::Retry {
                        max_attempts: 2,
                        delay: Duration::from_millis(250),
                    }
                } else {
                    RecoveryStrategy::Fatal
                }
            }
            AppError::Fatal(_) => RecoveryStrategy::Fatal,
            _ => RecoveryStrategy::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_loss_recovers_by_reenumeration() {
        let err = AppError::Audio(AudioError::DeviceUnavailable {
            name: "front:0".into(),
        });
        assert!(matches!(
            err.recovery_strategy(),
            RecoveryStrategy::Reenumerate
        ));
    }

    #[test]
    fn unsupported_format_falls_back_to_passthrough() {
        let err = AppError::Audio(AudioError::FormatUnsupported {
            details: "24-bit float".into(),
        });
        assert!(matches!(
            err.recovery_strategy(),
            RecoveryStrategy::Passthrough
        ));
    }

    #[test]
    fn unrecoverable_engine_failure_is_fatal() {
        let err = AppError::Session(SessionError::Engine {
            message: "model missing".into(),
            recoverable: false,
        });
        assert!(matches!(err.recovery_strategy(), RecoveryStrategy::Fatal));
    }
}
