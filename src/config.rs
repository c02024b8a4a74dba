//! Configuration for the voice call core

use std::time::Duration;

use crate::{Error, Result};

/// Default system instruction seeded into a fresh conversation history
const DEFAULT_ASSISTANT_PROMPT: &str =
    "You are a helpful voice assistant in a group call. Keep replies short and conversational.";

/// Top-level configuration for a call provider
#[derive(Debug, Clone)]
pub struct Config {
    /// Voice-activity segmentation parameters
    pub vad: VadConfig,

    /// Round-trip pipeline parameters
    pub pipeline: PipelineConfig,

    /// Reconnect behavior
    pub reconnect: ReconnectConfig,

    /// Queue capacities
    pub queues: QueueConfig,

    /// API keys for the remote collaborators
    pub api_keys: ApiKeys,
}

/// Voice-activity detection and segmentation parameters
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Normalized RMS energy threshold in [0, 1] above which a chunk is voiced
    pub energy_threshold: f32,

    /// Silence duration that closes an utterance
    pub silence_ms: u64,

    /// Hard cap on utterance duration
    pub max_utterance_ms: u64,

    /// Audio retained from before voice onset
    pub pre_roll_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            silence_ms: 800,
            max_utterance_ms: 15_000,
            pre_roll_ms: 300,
        }
    }
}

/// Round-trip pipeline parameters
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// System instruction seeded into each speaker's history
    pub assistant_prompt: String,

    /// Maximum retained history turns (oldest discarded first)
    pub max_history_turns: usize,

    /// Optional language hint passed to the transcription collaborator
    pub language_hint: Option<String>,

    /// Hard timeout on format-conversion subprocess calls
    pub conversion_timeout: Duration,

    /// Transcription model identifier
    pub stt_model: String,

    /// Chat completion model identifier
    pub chat_model: String,

    /// Speech synthesis model identifier
    pub tts_model: String,

    /// Speech synthesis voice
    pub tts_voice: String,

    /// Speech synthesis speed multiplier
    pub tts_speed: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            assistant_prompt: DEFAULT_ASSISTANT_PROMPT.to_string(),
            max_history_turns: 20,
            language_hint: None,
            conversion_timeout: Duration::from_secs(30),
            stt_model: "whisper-1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
        }
    }
}

/// Reconnect behavior after a transport disruption
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    /// How long to wait for the transport to self-heal before reconnecting
    pub resume_grace: Duration,

    /// Maximum reconnect attempts before terminal disconnect
    pub max_attempts: u32,

    /// Linear backoff unit: attempt N waits N × this duration
    pub backoff_unit: Duration,

    /// Per-attempt bound on the transport join itself
    pub join_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            resume_grace: Duration::from_secs(5),
            max_attempts: 3,
            backoff_unit: Duration::from_millis(1000),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Bounds on the per-call queues
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Pending utterances per call; over-capacity enqueues are dropped
    pub processing_capacity: usize,

    /// Ready-to-play buffers per call; over-capacity evicts the oldest
    pub playback_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            processing_capacity: 10,
            playback_capacity: 5,
        }
    }
}

/// API keys for the remote collaborators
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper STT, chat completion, TTS)
    pub openai: Option<String>,

    /// `Deepgram` API key (alternative STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (alternative TTS)
    pub elevenlabs: Option<String>,
}

impl ApiKeys {
    /// True if at least the keys needed for a full round trip are present
    #[must_use]
    pub fn pipeline_ready(&self) -> bool {
        self.openai.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            pipeline: PipelineConfig::default(),
            reconnect: ReconnectConfig::default(),
            queues: QueueConfig::default(),
            api_keys: ApiKeys::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Every knob has a default; only malformed values are an error. Missing
    /// API keys are not an error here; the call runs with the conversation
    /// pipeline disabled (see `CallProvider`).
    ///
    /// # Errors
    ///
    /// Returns error if a numeric override cannot be parsed
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.vad.energy_threshold =
            parse_env("CADENCE_VAD_THRESHOLD", config.vad.energy_threshold)?;
        config.vad.silence_ms = parse_env("CADENCE_VAD_SILENCE_MS", config.vad.silence_ms)?;
        config.vad.max_utterance_ms =
            parse_env("CADENCE_VAD_MAX_UTTERANCE_MS", config.vad.max_utterance_ms)?;
        config.vad.pre_roll_ms = parse_env("CADENCE_VAD_PRE_ROLL_MS", config.vad.pre_roll_ms)?;

        if let Ok(prompt) = std::env::var("CADENCE_ASSISTANT_PROMPT") {
            config.pipeline.assistant_prompt = prompt;
        }
        config.pipeline.language_hint = std::env::var("CADENCE_LANGUAGE_HINT").ok();
        config.pipeline.max_history_turns =
            parse_env("CADENCE_MAX_HISTORY_TURNS", config.pipeline.max_history_turns)?;
        if let Ok(model) = std::env::var("CADENCE_STT_MODEL") {
            config.pipeline.stt_model = model;
        }
        if let Ok(model) = std::env::var("CADENCE_CHAT_MODEL") {
            config.pipeline.chat_model = model;
        }
        if let Ok(model) = std::env::var("CADENCE_TTS_MODEL") {
            config.pipeline.tts_model = model;
        }
        if let Ok(voice) = std::env::var("CADENCE_TTS_VOICE") {
            config.pipeline.tts_voice = voice;
        }

        config.reconnect.max_attempts =
            parse_env("CADENCE_RECONNECT_ATTEMPTS", config.reconnect.max_attempts)?;

        config.api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok(),
            deepgram: std::env::var("DEEPGRAM_API_KEY").ok(),
            elevenlabs: std::env::var("ELEVENLABS_API_KEY").ok(),
        };

        if !config.api_keys.pipeline_ready() {
            tracing::warn!(
                "no OPENAI_API_KEY configured - calls will run without the conversation pipeline"
            );
        }

        Ok(config)
    }
}

/// Parse an env var override, keeping the default when unset
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {name}: {raw}"))),
        Err(_) => Ok(default),
    }
}
