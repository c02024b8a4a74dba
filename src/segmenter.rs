//! Utterance segmentation
//!
//! Turns one speaker's continuous PCM stream into discrete utterances using
//! energy-threshold voice-activity detection with pre-roll buffering and
//! silence/duration cutoffs. Pure, stateful, single-speaker scope; no I/O.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::audio::{ms_to_bytes, rms_energy};
use crate::clock::Clock;
use crate::config::VadConfig;

/// Opaque per-call speaker identifier (transport-assigned)
pub type SpeakerId = u64;

/// Why an utterance was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Configured silence window elapsed after the last voiced chunk
    SilenceTimeout,
    /// Utterance reached the configured maximum duration
    MaxDuration,
}

/// A contiguous span of one speaker's audio judged to be one spoken turn
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Speaker the audio belongs to
    pub speaker: SpeakerId,
    /// Concatenated s16le 48 kHz stereo payload
    pub pcm: Vec<u8>,
    /// Wall-clock emission time
    pub emitted_at: chrono::DateTime<chrono::Utc>,
    /// Why the utterance was closed
    pub reason: FlushReason,
}

/// Per-speaker voice-activity segmenter
///
/// `push` consumes chunks in strictly increasing time order and returns a
/// completed [`Utterance`] when a boundary is reached. Silence timing is
/// measured through the injected [`Clock`].
pub struct UtteranceSegmenter {
    speaker: SpeakerId,
    config: VadConfig,
    clock: Arc<dyn Clock>,
    /// Recent chunks captured before voice onset, bounded by `pre_roll_ms`
    pre_roll: VecDeque<Vec<u8>>,
    pre_roll_bytes: usize,
    /// Chunks of the in-progress utterance
    chunks: Vec<Vec<u8>>,
    chunk_bytes: usize,
    speaking: bool,
    last_voice: Option<Instant>,
}

impl UtteranceSegmenter {
    /// Create a segmenter for one speaker
    #[must_use]
    pub fn new(speaker: SpeakerId, config: VadConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            speaker,
            config,
            clock,
            pre_roll: VecDeque::new(),
            pre_roll_bytes: 0,
            chunks: Vec::new(),
            chunk_bytes: 0,
            speaking: false,
            last_voice: None,
        }
    }

    /// The speaker this segmenter belongs to
    #[must_use]
    pub const fn speaker(&self) -> SpeakerId {
        self.speaker
    }

    /// Whether a voiced segment is currently open
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Total bytes currently held in the pre-roll buffer
    #[must_use]
    pub const fn pre_roll_bytes(&self) -> usize {
        self.pre_roll_bytes
    }

    /// Consume one PCM chunk, returning a completed utterance on a boundary
    pub fn push(&mut self, chunk: &[u8]) -> Option<Utterance> {
        let energy = rms_energy(chunk);
        let voiced = energy >= self.config.energy_threshold;
        let now = self.clock.now();

        if self.speaking {
            self.chunks.push(chunk.to_vec());
            self.chunk_bytes += chunk.len();
            if voiced {
                self.last_voice = Some(now);
            }

            if self.chunk_bytes >= ms_to_bytes(self.config.max_utterance_ms) {
                return self.flush(FlushReason::MaxDuration);
            }

            if !voiced {
                let silent_for = self
                    .last_voice
                    .map_or(std::time::Duration::ZERO, |t| now.duration_since(t));
                if silent_for.as_millis() as u64 >= self.config.silence_ms {
                    return self.flush(FlushReason::SilenceTimeout);
                }
            }

            return None;
        }

        if voiced {
            // Voice onset: seed the utterance with the trimmed pre-roll plus
            // this chunk, so the first syllables are not clipped.
            self.speaking = true;
            self.last_voice = Some(now);
            self.chunk_bytes = self.pre_roll_bytes + chunk.len();
            self.chunks = self.pre_roll.drain(..).collect();
            self.chunks.push(chunk.to_vec());
            self.pre_roll_bytes = 0;

            tracing::trace!(speaker = self.speaker, energy, "voice onset");
            return None;
        }

        // Idle: keep only the freshest pre_roll_ms worth of audio
        self.pre_roll.push_back(chunk.to_vec());
        self.pre_roll_bytes += chunk.len();
        let budget = ms_to_bytes(self.config.pre_roll_ms);
        while self.pre_roll_bytes > budget {
            if let Some(oldest) = self.pre_roll.pop_front() {
                self.pre_roll_bytes -= oldest.len();
            }
        }

        None
    }

    /// Close the in-progress utterance, if any, and reset state
    fn flush(&mut self, reason: FlushReason) -> Option<Utterance> {
        if !self.speaking || self.chunks.is_empty() {
            self.reset();
            return None;
        }

        let mut pcm = Vec::with_capacity(self.chunk_bytes);
        for chunk in self.chunks.drain(..) {
            pcm.extend_from_slice(&chunk);
        }

        tracing::debug!(
            speaker = self.speaker,
            bytes = pcm.len(),
            reason = ?reason,
            "utterance emitted"
        );

        let utterance = Utterance {
            speaker: self.speaker,
            pcm,
            emitted_at: chrono::Utc::now(),
            reason,
        };
        self.reset();
        Some(utterance)
    }

    /// Discard all buffered state and return to idle
    pub fn reset(&mut self) {
        self.speaking = false;
        self.last_voice = None;
        self.pre_roll.clear();
        self.pre_roll_bytes = 0;
        self.chunks.clear();
        self.chunk_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BYTES_PER_MS;
    use crate::clock::ManualClock;

    const CHUNK_MS: u64 = 20;

    fn silence_chunk() -> Vec<u8> {
        vec![0u8; CHUNK_MS as usize * BYTES_PER_MS]
    }

    fn voiced_chunk() -> Vec<u8> {
        let samples = CHUNK_MS as usize * BYTES_PER_MS / 2;
        let mut pcm = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let value: i16 = if i % 2 == 0 { 4000 } else { -4000 };
            pcm.extend_from_slice(&value.to_le_bytes());
        }
        pcm
    }

    fn segmenter(clock: &ManualClock) -> UtteranceSegmenter {
        UtteranceSegmenter::new(1, VadConfig::default(), Arc::new(clock.clone()))
    }

    #[test]
    fn idle_silence_never_flushes() {
        let clock = ManualClock::new();
        let mut seg = segmenter(&clock);
        for _ in 0..500 {
            clock.advance_ms(CHUNK_MS);
            assert!(seg.push(&silence_chunk()).is_none());
        }
        assert!(!seg.is_speaking());
    }

    #[test]
    fn pre_roll_stays_within_byte_budget() {
        let clock = ManualClock::new();
        let mut seg = segmenter(&clock);
        let budget = ms_to_bytes(VadConfig::default().pre_roll_ms);
        for _ in 0..200 {
            clock.advance_ms(CHUNK_MS);
            seg.push(&silence_chunk());
            assert!(seg.pre_roll_bytes() <= budget);
        }
    }

    #[test]
    fn silence_timeout_closes_utterance_with_pre_roll() {
        let clock = ManualClock::new();
        let mut seg = segmenter(&clock);

        // 300 ms of silence fills the pre-roll exactly
        for _ in 0..15 {
            clock.advance_ms(CHUNK_MS);
            assert!(seg.push(&silence_chunk()).is_none());
        }

        // 1000 ms of voice
        for _ in 0..50 {
            clock.advance_ms(CHUNK_MS);
            assert!(seg.push(&voiced_chunk()).is_none());
        }

        // Silence until the 800 ms window elapses
        let mut emitted = None;
        for _ in 0..45 {
            clock.advance_ms(CHUNK_MS);
            if let Some(u) = seg.push(&silence_chunk()) {
                emitted = Some(u);
                break;
            }
        }

        let utterance = emitted.expect("utterance should flush on silence");
        assert_eq!(utterance.reason, FlushReason::SilenceTimeout);
        // Payload covers pre-roll + voice + the silence window
        assert_eq!(utterance.pcm.len(), ms_to_bytes(300 + 1000 + 800));
        assert!(!seg.is_speaking());
    }

    #[test]
    fn max_duration_closes_without_silence() {
        let clock = ManualClock::new();
        let config = VadConfig {
            max_utterance_ms: 1000,
            ..VadConfig::default()
        };
        let mut seg = UtteranceSegmenter::new(7, config, Arc::new(clock.clone()));

        let mut emitted = None;
        for _ in 0..60 {
            clock.advance_ms(CHUNK_MS);
            if let Some(u) = seg.push(&voiced_chunk()) {
                emitted = Some(u);
                break;
            }
        }

        let utterance = emitted.expect("utterance should flush at the duration cap");
        assert_eq!(utterance.reason, FlushReason::MaxDuration);
        assert_eq!(utterance.pcm.len(), ms_to_bytes(1000));
    }

    #[test]
    fn reset_discards_open_segment() {
        let clock = ManualClock::new();
        let mut seg = segmenter(&clock);
        clock.advance_ms(CHUNK_MS);
        seg.push(&voiced_chunk());
        assert!(seg.is_speaking());

        seg.reset();
        assert!(!seg.is_speaking());
        assert_eq!(seg.pre_roll_bytes(), 0);
    }
}
