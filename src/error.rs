//! Error types for the Ada voice assistant

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing capability, invalid value)
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Transcript source failed to produce an utterance
    #[error("transcript source error: {0}")]
    Transcript(String),

    /// Chat completion service failure
    #[error("chat service error: {0}")]
    Service(String),

    /// Remote speech synthesis failure
    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    /// Local audio playback failure
    #[error("playback error: {0}")]
    Playback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
