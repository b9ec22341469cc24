//! Error types for the voice front-end

use thiserror::Error;

use crate::session::RecognitionErrorKind;

/// Result type alias for voice session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Credentials rejected by a speech provider
    #[error("auth error: {0}")]
    Auth(String),

    /// No speech recognition capability on this runtime
    #[error("speech recognition is not available on this platform")]
    RecognitionUnavailable,

    /// Recognition engine reported an error
    #[error("recognition error: {0}")]
    Recognition(RecognitionErrorKind),

    /// Assistant backend call failed (transport error or non-success status)
    #[error("assistant request failed: {0}")]
    RequestFailed(String),

    /// Assistant backend answered without a usable message
    #[error("assistant returned no usable message")]
    EmptyReply,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
