//! Remote collaborator contracts and their HTTP implementations
//!
//! The pipeline stage sees only the three traits here; the concrete clients
//! talk to OpenAI-compatible, Deepgram, and ElevenLabs endpoints. Error
//! payloads from these services are never logged verbatim, only status
//! codes, to avoid leaking credentials or large response bodies.

mod chat;
mod stt;
mod tts;

pub use chat::OpenAiChatCompleter;
pub use stt::HttpTranscriber;
pub use tts::HttpSynthesizer;

use std::num::NonZeroU32;

use async_trait::async_trait;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::history::Turn;
use crate::Result;

/// Transcription collaborator: WAV audio in, text out
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a WAV-containerized utterance
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transcription`] on service failure
    async fn transcribe(&self, wav: &[u8], language_hint: Option<&str>) -> Result<String>;
}

/// Chat completion collaborator: ordered turns in, reply text out
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    /// Generate a reply for the conversation so far
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Completion`] on service failure
    async fn complete(&self, turns: &[Turn]) -> Result<String>;
}

/// Speech synthesis collaborator: text in, encoded audio out
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize speech for the reply text (collaborator-native encoding)
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Synthesis`] on service failure
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Keyed rate gate shared across all calls
///
/// The single piece of cross-call shared state: an atomic check keyed by a
/// rate-limit bucket (provider + model). Awaiting `acquire` is a pipeline
/// suspension point, so audio ingestion is never blocked by it.
pub struct RateGate {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl RateGate {
    /// Create a gate allowing `per_second` requests per bucket
    #[must_use]
    pub fn new(per_second: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::keyed(Quota::per_second(per_second)),
        }
    }

    /// Wait until the bucket admits another request
    pub async fn acquire(&self, bucket: &str) {
        self.limiter.until_key_ready(&bucket.to_string()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_gate_admits_within_quota() {
        let gate = RateGate::new(NonZeroU32::new(100).unwrap());
        // Must not block when well under quota
        gate.acquire("openai:gpt-4o-mini").await;
        gate.acquire("openai:tts-1").await;
    }
}
