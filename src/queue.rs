//! Bounded per-call queues
//!
//! Both queues enforce fixed capacities without ever blocking a producer:
//! the processing queue rejects new work when full, the playback queue
//! evicts its oldest buffer to favor recency. Real-time audio must never
//! block on backpressure.

use std::collections::VecDeque;
use std::time::Instant;

use crate::segmenter::SpeakerId;

/// A pending utterance awaiting the round-trip pipeline
#[derive(Debug, Clone)]
pub struct PendingUtterance {
    /// Speaker the utterance belongs to
    pub speaker: SpeakerId,
    /// Concatenated PCM payload
    pub pcm: Vec<u8>,
    /// When the utterance was admitted
    pub enqueued_at: Instant,
}

/// FIFO of pending utterances across all speakers of one call.
///
/// Admission control: over-capacity enqueues are dropped with a warning,
/// never surfaced as an error to any caller.
#[derive(Debug)]
pub struct ProcessingQueue {
    entries: VecDeque<PendingUtterance>,
    capacity: usize,
}

impl ProcessingQueue {
    /// Create a queue with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Admit an utterance. Returns false if the queue was full and the
    /// utterance was dropped.
    pub fn enqueue(&mut self, speaker: SpeakerId, pcm: Vec<u8>) -> bool {
        if self.entries.len() >= self.capacity {
            tracing::warn!(
                speaker,
                bytes = pcm.len(),
                capacity = self.capacity,
                "processing queue full, utterance dropped"
            );
            return false;
        }
        self.entries.push_back(PendingUtterance {
            speaker,
            pcm,
            enqueued_at: Instant::now(),
        });
        true
    }

    /// Pop the head entry (FIFO across speakers, no priority)
    pub fn pop(&mut self) -> Option<PendingUtterance> {
        self.entries.pop_front()
    }

    /// Number of pending entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all pending entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// FIFO of ready-to-play PCM buffers for one call.
///
/// Admission control: over-capacity sends evict the oldest buffer before
/// inserting the new one. Stale spoken audio is discarded rather than
/// delaying the newest reply.
#[derive(Debug)]
pub struct PlaybackQueue {
    buffers: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl PlaybackQueue {
    /// Create a queue with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Enqueue a buffer, evicting the oldest entry when full
    pub fn push(&mut self, pcm: Vec<u8>) {
        if self.buffers.len() >= self.capacity {
            if let Some(evicted) = self.buffers.pop_front() {
                tracing::warn!(
                    evicted_bytes = evicted.len(),
                    capacity = self.capacity,
                    "playback queue full, oldest buffer evicted"
                );
            }
        }
        self.buffers.push_back(pcm);
    }

    /// Pop the oldest buffer for the sink
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.buffers.pop_front()
    }

    /// Number of queued buffers
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// True if nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Drop all queued buffers
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}
