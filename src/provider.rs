//! Call provider
//!
//! The host-facing entry point: owns the collaborator clients, tracks live
//! calls by id, and enforces the one-call-per-destination rule. Calls are
//! spawned onto the runtime and drive themselves; the provider only hands
//! out handles.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use crate::call::{self, Call, CallContext, CallStatus};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::convert::FormatConverter;
use crate::pipeline::PipelineStage;
use crate::services::{
    ChatCompleter, HttpSynthesizer, HttpTranscriber, OpenAiChatCompleter, RateGate, Synthesizer,
    Transcriber,
};
use crate::transport::{Destination, JoinFlags, Transport};
use crate::{Error, Result};

/// Collaborator request budget per model bucket
const REQUESTS_PER_SECOND: u32 = 2;

/// Parameters for starting a call
#[derive(Debug, Clone, Copy)]
pub struct StartCallParams {
    /// Where to connect
    pub destination: Destination,
    /// Join-time mute/deafen flags
    pub flags: JoinFlags,
}

/// Creates and tracks voice calls
pub struct CallProvider {
    config: Config,
    transport: Arc<dyn Transport>,
    pipeline: Option<Arc<PipelineStage>>,
    clock: Arc<dyn Clock>,
    calls: Mutex<HashMap<uuid::Uuid, Arc<Call>>>,
}

impl CallProvider {
    /// Create a provider
    ///
    /// Collaborator clients are assembled from the configured API keys. With
    /// no usable key set the provider still works: calls connect and segment
    /// audio, but no conversation round trips run.
    #[must_use]
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        converter: Arc<dyn FormatConverter>,
    ) -> Self {
        let pipeline = build_pipeline(&config, converter);
        if pipeline.is_none() {
            tracing::warn!("conversation pipeline disabled, calls will only segment audio");
        }

        Self {
            config,
            transport,
            pipeline,
            clock: Arc::new(SystemClock),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the clock (deterministic tests)
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the assembled pipeline (tests wire stubs through here)
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: Option<Arc<PipelineStage>>) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Start a call to a destination
    ///
    /// At most one live call per destination: if one is already connected the
    /// existing handle is returned; if one is still connecting this is an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnecting`] if a call to the same destination
    /// has not finished connecting yet
    pub fn start_call(&self, params: StartCallParams) -> Result<Arc<Call>> {
        let mut calls = self.calls.lock().unwrap();
        calls.retain(|_, call| !call.status().is_terminal());

        for call in calls.values() {
            if call.destination() != params.destination {
                continue;
            }
            match call.status() {
                CallStatus::Connecting => {
                    return Err(Error::AlreadyConnecting(params.destination.to_string()));
                }
                // Reuse is best effort: the call may still end on its own
                CallStatus::Connected | CallStatus::Reconnecting => {
                    tracing::debug!(
                        call = %call.id(),
                        destination = %params.destination,
                        "reusing live call"
                    );
                    return Ok(Arc::clone(call));
                }
                CallStatus::Disconnected | CallStatus::Failed => {}
            }
        }

        let id = uuid::Uuid::new_v4();
        let call = call::spawn(CallContext {
            id,
            destination: params.destination,
            flags: params.flags,
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            transport: Arc::clone(&self.transport),
            pipeline: self.pipeline.clone(),
        });

        tracing::info!(call = %id, destination = %params.destination, "call started");
        calls.insert(id, Arc::clone(&call));
        Ok(call)
    }

    /// Look up a live call by id
    #[must_use]
    pub fn get_call(&self, id: uuid::Uuid) -> Option<Arc<Call>> {
        self.calls.lock().unwrap().get(&id).cloned()
    }

    /// End a call by id
    ///
    /// Unknown or already-ended ids are a no-op.
    pub fn end_call(&self, id: uuid::Uuid) {
        if let Some(call) = self.calls.lock().unwrap().remove(&id) {
            call.end();
        }
    }

    /// Number of tracked non-terminal calls
    #[must_use]
    pub fn active_calls(&self) -> usize {
        let mut calls = self.calls.lock().unwrap();
        calls.retain(|_, call| !call.status().is_terminal());
        calls.len()
    }
}

/// Assemble the round-trip pipeline from the configured keys
///
/// Chat completion requires the `OpenAI` key; without it there is no pipeline
/// at all. STT prefers Deepgram when its key is present, TTS prefers
/// ElevenLabs.
fn build_pipeline(config: &Config, converter: Arc<dyn FormatConverter>) -> Option<Arc<PipelineStage>> {
    let openai = config.api_keys.openai.clone()?;
    let gate = Arc::new(RateGate::new(NonZeroU32::new(REQUESTS_PER_SECOND)?));

    let transcriber: Arc<dyn Transcriber> = match &config.api_keys.deepgram {
        Some(key) => match HttpTranscriber::new_deepgram(key.clone(), "nova-2".to_string()) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::warn!(error = %e, "Deepgram STT unavailable");
                return None;
            }
        },
        None => {
            match HttpTranscriber::new_whisper(openai.clone(), config.pipeline.stt_model.clone()) {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    tracing::warn!(error = %e, "Whisper STT unavailable");
                    return None;
                }
            }
        }
    };

    let completer: Arc<dyn ChatCompleter> =
        match OpenAiChatCompleter::new(openai.clone(), config.pipeline.chat_model.clone()) {
            Ok(client) => Arc::new(client.with_rate_gate(Arc::clone(&gate))),
            Err(e) => {
                tracing::warn!(error = %e, "chat completion unavailable");
                return None;
            }
        };

    let synthesizer: Arc<dyn Synthesizer> = match &config.api_keys.elevenlabs {
        Some(key) => match HttpSynthesizer::new_elevenlabs(
            key.clone(),
            config.pipeline.tts_voice.clone(),
            "eleven_monolingual_v1".to_string(),
        ) {
            Ok(client) => Arc::new(client.with_rate_gate(Arc::clone(&gate))),
            Err(e) => {
                tracing::warn!(error = %e, "ElevenLabs TTS unavailable");
                return None;
            }
        },
        None => match HttpSynthesizer::new_openai(
            openai,
            config.pipeline.tts_voice.clone(),
            config.pipeline.tts_speed,
            config.pipeline.tts_model.clone(),
        ) {
            Ok(client) => Arc::new(client.with_rate_gate(gate)),
            Err(e) => {
                tracing::warn!(error = %e, "OpenAI TTS unavailable");
                return None;
            }
        },
    };

    Some(Arc::new(PipelineStage::new(
        transcriber,
        completer,
        synthesizer,
        converter,
        config.pipeline.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::NativeConverter;
    use crate::transport::LoopbackTransport;

    fn provider(config: Config) -> CallProvider {
        CallProvider::new(
            config,
            Arc::new(LoopbackTransport::new()),
            Arc::new(NativeConverter::default()),
        )
    }

    #[test]
    fn no_keys_means_no_pipeline() {
        let p = provider(Config::default());
        assert!(p.pipeline.is_none());
    }

    #[test]
    fn openai_key_enables_pipeline() {
        let mut config = Config::default();
        config.api_keys.openai = Some("sk-test".to_string());
        let p = provider(config);
        assert!(p.pipeline.is_some());
    }

    #[test]
    fn empty_key_is_rejected_during_assembly() {
        let mut config = Config::default();
        config.api_keys.openai = Some(String::new());
        let p = provider(config);
        assert!(p.pipeline.is_none());
    }
}
