//! Error types for the Aura assistant

use thiserror::Error;

/// Result type alias for Aura operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant
///
/// Backend conversation failures have their own type, see
/// [`BackendError`](crate::backend::BackendError)
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Wake word scoring or voice activity error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Inference backend error
    #[error("backend error: {0}")]
    Backend(String),

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

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::Config(format!("invalid url: {e}"))
    }
}

impl From<crate::backend::BackendError> for Error {
    fn from(e: crate::backend::BackendError) -> Self {
        Self::Backend(e.to_string())
    }
}
