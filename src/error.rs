//! Error types for the Cadence voice core

use thiserror::Error;

/// Result type alias for Cadence operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice call core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credentials or required settings).
    /// Fatal at Call construction; never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport join failure
    #[error("join error: {0}")]
    Join(String),

    /// Audio format conversion failure
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Transcription collaborator failure
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Chat completion collaborator failure
    #[error("completion error: {0}")]
    Completion(String),

    /// Speech synthesis collaborator failure
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Transport connection disruption
    #[error("transport error: {0}")]
    Transport(String),

    /// A call for the same destination is already connecting
    #[error("already connecting to destination: {0}")]
    AlreadyConnecting(String),

    /// Operation on a call that has reached a terminal state
    #[error("stale session: {0}")]
    StaleSession(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
