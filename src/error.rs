//! Error taxonomy for the voice-chat core.
//!
//! Every failure inside the recorder, player and message distribution is
//! converted at the operation boundary into a boolean/`None` sentinel plus
//! an observable error value of this type. The `Display` strings double as
//! the user-facing status text.

use thiserror::Error;

/// Result type alias for audio operations
pub type AudioResult<T> = Result<T, AudioError>;

/// Errors surfaced by the recorder, player and chat components
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    /// Microphone access was refused by the user or the system
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No usable capture or playback device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A bounded wait elapsed without resolution
    #[error("audio operation timed out")]
    Timeout,

    /// The audio container could not be parsed
    #[error("failed to decode audio: {0}")]
    Decode(String),

    /// The container uses a layout this crate does not handle
    #[error("unsupported audio format: {0}")]
    FormatUnsupported(String),

    /// The source could not be read or delivered
    #[error("network error: {0}")]
    Network(String),

    /// The silence-rejection check discarded the capture
    #[error("recording rejected: no audible signal")]
    ValidationRejected,

    /// The caller handed us something unusable
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An in-flight load was torn down before it resolved
    #[error("audio load aborted")]
    LoadAborted,

    /// Anything the platform reports without a clearer cause
    #[error("audio error: {0}")]
    Unknown(String),
}
