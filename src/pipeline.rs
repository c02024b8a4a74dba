//! Round-trip pipeline stage
//!
//! Converts one utterance into a spoken reply: format conversion, then
//! transcription, then chat completion against the speaker's history, then
//! synthesis, then conversion back to the transport format. Collaborator
//! failures never escape this stage; a failed step aborts the item and the
//! queue moves on.

use std::sync::Arc;

use crate::audio::AudioFormat;
use crate::config::PipelineConfig;
use crate::convert::FormatConverter;
use crate::history::{ConversationHistory, Role};
use crate::segmenter::SpeakerId;
use crate::services::{ChatCompleter, Synthesizer, Transcriber};

/// One utterance → transcript → reply → synthesized-audio round trip
pub struct PipelineStage {
    transcriber: Arc<dyn Transcriber>,
    completer: Arc<dyn ChatCompleter>,
    synthesizer: Arc<dyn Synthesizer>,
    converter: Arc<dyn FormatConverter>,
    config: PipelineConfig,
}

impl PipelineStage {
    /// Assemble the stage from its collaborators
    #[must_use]
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        completer: Arc<dyn ChatCompleter>,
        synthesizer: Arc<dyn Synthesizer>,
        converter: Arc<dyn FormatConverter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            transcriber,
            completer,
            synthesizer,
            converter,
            config,
        }
    }

    /// Process one utterance for one speaker.
    ///
    /// Takes ownership of the speaker's history for the duration of the round
    /// trip (the per-call single-flight guarantee makes this race-free) and
    /// returns it together with the converted playback buffer, or `None` when
    /// the item was aborted. Failures are logged with the step identified and
    /// never propagate.
    pub async fn process(
        &self,
        speaker: SpeakerId,
        pcm: Vec<u8>,
        mut history: ConversationHistory,
    ) -> (ConversationHistory, Option<Vec<u8>>) {
        // 1. Transport format -> transcription format
        let stt_audio = match self
            .converter
            .convert(&pcm, AudioFormat::Pcm48kStereo, AudioFormat::Wav16kMono)
            .await
        {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(speaker, step = "convert-in", error = %e, "pipeline step failed");
                return (history, None);
            }
        };

        // 2. Transcribe
        let transcript = match self
            .transcriber
            .transcribe(&stt_audio, self.config.language_hint.as_deref())
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(speaker, step = "transcribe", error = %e, "pipeline step failed");
                return (history, None);
            }
        };
        let transcript = transcript.trim();
        if transcript.is_empty() {
            tracing::debug!(speaker, "empty transcript, skipping utterance");
            return (history, None);
        }

        // 3. Record the user turn (seed the history on first use). The cap
        //    applies here as well as after the assistant commit: a kept user
        //    turn from a failed exchange must not grow the history past it.
        if history.is_empty() {
            history = ConversationHistory::seeded(&self.config.assistant_prompt);
        }
        history.push(Role::User, transcript);
        history.truncate(self.config.max_history_turns);

        // 4. Generate a reply. A failure here leaves the user turn in place:
        //    the exchange attempt was real, only the reply is missing.
        let reply = match self.completer.complete(history.turns()).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(speaker, step = "complete", error = %e, "pipeline step failed");
                return (history, None);
            }
        };
        if reply.trim().is_empty() {
            tracing::debug!(speaker, "empty reply, skipping utterance");
            return (history, None);
        }

        // 5. Commit the assistant turn and cap the history
        history.push(Role::Assistant, reply.clone());
        history.truncate(self.config.max_history_turns);

        // 6. Synthesize
        let encoded = match self.synthesizer.synthesize(&reply).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(speaker, step = "synthesize", error = %e, "pipeline step failed");
                return (history, None);
            }
        };

        // 7. Synthesis format -> transport format
        match self
            .converter
            .convert(&encoded, AudioFormat::Mp3, AudioFormat::Pcm48kStereo)
            .await
        {
            Ok(playback) => {
                tracing::debug!(
                    speaker,
                    transcript_chars = transcript.len(),
                    reply_chars = reply.len(),
                    playback_bytes = playback.len(),
                    "round trip complete"
                );
                (history, Some(playback))
            }
            Err(e) => {
                tracing::warn!(speaker, step = "convert-out", error = %e, "pipeline step failed");
                (history, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::history::Turn;
    use crate::{Error, Result};

    struct StubTranscriber(Result<String>);

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe(&self, _wav: &[u8], _hint: Option<&str>) -> Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(Error::Transcription("stub failure".to_string())),
            }
        }
    }

    struct StubCompleter {
        reply: Result<String>,
        seen_turns: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ChatCompleter for StubCompleter {
        async fn complete(&self, turns: &[Turn]) -> Result<String> {
            self.seen_turns.lock().unwrap().push(turns.len());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(Error::Completion("stub failure".to_string())),
            }
        }
    }

    struct StubSynthesizer(Result<Vec<u8>>);

    #[async_trait]
    impl Synthesizer for StubSynthesizer {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
            match &self.0 {
                Ok(audio) => Ok(audio.clone()),
                Err(_) => Err(Error::Synthesis("stub failure".to_string())),
            }
        }
    }

    struct PassthroughConverter;

    #[async_trait]
    impl FormatConverter for PassthroughConverter {
        async fn convert(
            &self,
            audio: &[u8],
            _source: AudioFormat,
            _target: AudioFormat,
        ) -> Result<Vec<u8>> {
            Ok(audio.to_vec())
        }
    }

    fn stage(
        transcript: Result<String>,
        reply: Result<String>,
        synth: Result<Vec<u8>>,
    ) -> PipelineStage {
        PipelineStage::new(
            Arc::new(StubTranscriber(transcript)),
            Arc::new(StubCompleter {
                reply,
                seen_turns: Mutex::new(Vec::new()),
            }),
            Arc::new(StubSynthesizer(synth)),
            Arc::new(PassthroughConverter),
            PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn successful_round_trip_commits_both_turns() {
        let stage = stage(
            Ok("hello there".to_string()),
            Ok("hi! how can I help?".to_string()),
            Ok(vec![9, 9, 9]),
        );

        let (history, output) = stage
            .process(1, vec![0; 192], ConversationHistory::default())
            .await;

        assert_eq!(output, Some(vec![9, 9, 9]));
        // system seed + user + assistant
        assert_eq!(history.len(), 3);
        assert_eq!(history.turns()[0].role, Role::System);
        assert_eq!(history.turns()[1].content, "hello there");
        assert_eq!(history.turns()[2].content, "hi! how can I help?");
    }

    #[tokio::test]
    async fn empty_transcript_aborts_without_history_mutation() {
        let stage = stage(
            Ok("   ".to_string()),
            Ok("unused".to_string()),
            Ok(vec![1]),
        );

        let (history, output) = stage
            .process(1, vec![0; 192], ConversationHistory::default())
            .await;

        assert!(output.is_none());
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn chat_failure_keeps_user_turn_only() {
        let stage = stage(
            Ok("what time is it".to_string()),
            Err(Error::Completion("down".to_string())),
            Ok(vec![1]),
        );

        let (history, output) = stage
            .process(1, vec![0; 192], ConversationHistory::default())
            .await;

        assert!(output.is_none());
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[1].role, Role::User);
    }

    #[tokio::test]
    async fn synthesis_failure_still_commits_assistant_turn() {
        let stage = stage(
            Ok("question".to_string()),
            Ok("answer".to_string()),
            Err(Error::Synthesis("down".to_string())),
        );

        let (history, output) = stage
            .process(1, vec![0; 192], ConversationHistory::default())
            .await;

        assert!(output.is_none());
        assert_eq!(history.len(), 3);
        assert_eq!(history.turns()[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn transcription_failure_is_contained() {
        let stage = stage(
            Err(Error::Transcription("down".to_string())),
            Ok("unused".to_string()),
            Ok(vec![1]),
        );

        let (history, output) = stage
            .process(1, vec![0; 192], ConversationHistory::default())
            .await;

        assert!(output.is_none());
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn history_stays_capped_under_sustained_chat_failure() {
        let stage = stage(
            Ok("still there?".to_string()),
            Err(Error::Completion("down".to_string())),
            Ok(vec![1]),
        );
        let cap = PipelineConfig::default().max_history_turns;

        // Every failed exchange keeps its user turn; the cap must hold anyway
        let mut history = ConversationHistory::default();
        for _ in 0..(cap * 2) {
            let (returned, output) = stage.process(1, vec![0; 192], history).await;
            assert!(output.is_none());
            history = returned;
        }

        assert_eq!(history.len(), cap);
        assert_eq!(history.turns().last().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn history_is_capped_after_commit() {
        let stage = stage(
            Ok("u".to_string()),
            Ok("a".to_string()),
            Ok(vec![1]),
        );

        let mut history = ConversationHistory::seeded("sys");
        for i in 0..12 {
            history.push(Role::User, format!("u{i}"));
            history.push(Role::Assistant, format!("a{i}"));
        }

        let (history, _) = stage.process(1, vec![0; 192], history).await;
        assert_eq!(history.len(), PipelineConfig::default().max_history_turns);
    }
}
