//! Speech-to-text collaborator clients

use async_trait::async_trait;

use super::Transcriber;
use crate::{Error, Result};

/// Response from the OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from the Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug)]
enum SttProvider {
    Whisper,
    Deepgram,
}

/// Transcribes speech via an HTTP STT provider
pub struct HttpTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: SttProvider,
}

impl HttpTranscriber {
    /// Create a transcriber backed by `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a transcriber backed by Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Deepgram,
        })
    }

    async fn transcribe_whisper(&self, wav: &[u8], language: Option<&str>) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Transcription(e.to_string()))?,
            )
            .text("model", self.model.clone());
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Transcription(format!("Whisper request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            // Body deliberately not logged
            tracing::error!(status = %status, "Whisper API error");
            return Err(Error::Transcription(format!("Whisper API error {status}")));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::Transcription(format!("bad Whisper response: {e}")))?;

        tracing::debug!(chars = result.text.len(), "transcription complete");
        Ok(result.text)
    }

    async fn transcribe_deepgram(&self, wav: &[u8], language: Option<&str>) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting Deepgram transcription");

        let mut url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );
        if let Some(language) = language {
            url.push_str(&format!("&language={language}"));
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(wav.to_vec())
            .send()
            .await
            .map_err(|e| Error::Transcription(format!("Deepgram request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = %status, "Deepgram API error");
            return Err(Error::Transcription(format!("Deepgram API error {status}")));
        }

        let result: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| Error::Transcription(format!("bad Deepgram response: {e}")))?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::debug!(chars = transcript.len(), "transcription complete");
        Ok(transcript)
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, wav: &[u8], language_hint: Option<&str>) -> Result<String> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(wav, language_hint).await,
            SttProvider::Deepgram => self.transcribe_deepgram(wav, language_hint).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whisper_requires_api_key() {
        let result = HttpTranscriber::new_whisper(String::new(), "whisper-1".to_string());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn deepgram_requires_api_key() {
        let result = HttpTranscriber::new_deepgram(String::new(), "nova-2".to_string());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
