//! Error types for the kaiwa pipeline

use thiserror::Error;

/// Result type alias for kaiwa operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the conversation pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access refused by the platform
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Speech recognition is not available on this host
    #[error("speech recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    /// No speech detected before the listening window closed (recoverable)
    #[error("no speech detected")]
    NoSpeech,

    /// Network transport failure reaching a remote service
    #[error("network unavailable: {0}")]
    Network(String),

    /// Remote service rejected the credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Remote service rate limit hit
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Remote service returned an error status
    #[error("remote service error: {0}")]
    RemoteService(String),

    /// Primary speech synthesis failed (recovered via fallback, never aborts a turn)
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// No local fallback synthesizer usable on this host
    #[error("fallback synthesizer unavailable: {0}")]
    FallbackUnavailable(String),

    /// Audio playback failure (item skipped, sequencing continues)
    #[error("playback error: {0}")]
    Playback(String),

    /// Audio device or decoding error
    #[error("audio error: {0}")]
    Audio(String),

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

impl Error {
    /// Whether this error aborts the current turn.
    ///
    /// Synthesis, fallback, and playback failures are contained at the
    /// sentence/item level and must never end a turn; permission, recognition,
    /// network, and remote-service failures do.
    #[must_use]
    pub const fn aborts_turn(&self) -> bool {
        match self {
            Self::PermissionDenied(_)
            | Self::RecognitionUnavailable(_)
            | Self::Network(_)
            | Self::Unauthorized(_)
            | Self::RateLimited(_)
            | Self::RemoteService(_) => true,
            Self::Config(_)
            | Self::NoSpeech
            | Self::Synthesis(_)
            | Self::FallbackUnavailable(_)
            | Self::Playback(_)
            | Self::Audio(_)
            | Self::Io(_)
            | Self::Http(_)
            | Self::Serialization(_)
            | Self::Toml(_) => false,
        }
    }
}
