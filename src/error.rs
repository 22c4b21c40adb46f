//! Error types for Vera voice

use thiserror::Error;

/// Result type alias for Vera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Vera voice
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Sequence definition error
    #[error("sequence error: {0}")]
    Sequence(String),

    /// Sequence not found
    #[error("sequence not found: {0}")]
    SequenceNotFound(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// The session driver has shut down
    #[error("session closed")]
    SessionClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Why a speech capture ended without a usable result
///
/// Capture errors are observable state, never propagated out of the
/// capture controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// Microphone access denied or no input device
    #[error("microphone permission denied")]
    PermissionDenied,

    /// Nothing was said before the engine gave up
    #[error("no speech detected")]
    NoSpeech,

    /// Recognition service unreachable
    #[error("recognition network error")]
    NetworkError,

    /// Capture was aborted
    #[error("capture aborted")]
    Aborted,

    /// Anything else the engine reported
    #[error("unknown capture error")]
    Unknown,
}

/// Speech synthesis failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    /// Backend missing or unreachable
    #[error("synthesis backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend answered with a failure
    #[error("synthesis request failed: {0}")]
    RequestFailed(String),

    /// Audio could not be decoded or played
    #[error("playback failed: {0}")]
    PlaybackFailed(String),
}

/// Reply producer failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    /// The producer could not produce a reply
    #[error("reply producer failed: {0}")]
    ProducerFailed(String),
}
