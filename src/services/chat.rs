//! Chat completion collaborator client

use std::sync::Arc;

use async_trait::async_trait;

use super::{ChatCompleter, RateGate};
use crate::history::Turn;
use crate::{Error, Result};

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(serde::Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(serde::Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Generates replies via an OpenAI-compatible chat completion endpoint
pub struct OpenAiChatCompleter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    rate_gate: Option<Arc<RateGate>>,
}

impl OpenAiChatCompleter {
    /// Create a completer against the `OpenAI` API
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for chat completion".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key,
            model,
            max_tokens: 1024,
            rate_gate: None,
        })
    }

    /// Point the completer at an OpenAI-compatible base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Gate requests through a shared keyed rate limiter
    #[must_use]
    pub fn with_rate_gate(mut self, gate: Arc<RateGate>) -> Self {
        self.rate_gate = Some(gate);
        self
    }
}

#[async_trait]
impl ChatCompleter for OpenAiChatCompleter {
    async fn complete(&self, turns: &[Turn]) -> Result<String> {
        if let Some(gate) = &self.rate_gate {
            gate.acquire(&format!("chat:{}", self.model)).await;
        }

        let request = ChatRequest {
            model: &self.model,
            messages: turns
                .iter()
                .map(|t| ChatMessage {
                    role: t.role.as_str(),
                    content: &t.content,
                })
                .collect(),
            max_tokens: self.max_tokens,
        };

        tracing::debug!(turns = turns.len(), model = %self.model, "requesting completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Completion(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            // Body deliberately not logged
            tracing::error!(status = %status, "chat API error");
            return Err(Error::Completion(format!("chat API error {status}")));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Completion(format!("bad chat response: {e}")))?;

        let reply = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::debug!(chars = reply.len(), "completion received");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completer_requires_api_key() {
        let result = OpenAiChatCompleter::new(String::new(), "gpt-4o-mini".to_string());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let completer = OpenAiChatCompleter::new("sk-test".to_string(), "m".to_string())
            .unwrap()
            .with_base_url("http://localhost:8080/v1/".to_string());
        assert_eq!(completer.base_url, "http://localhost:8080/v1");
    }
}
