//! Voice transport contracts
//!
//! The actual voice-channel plumbing (gateway signaling, UDP audio, codec
//! work, encryption) lives outside this core. The call state machine sees
//! only these narrow contracts: join a destination, receive decoded PCM
//! frames tagged by speaker, observe lifecycle events, and feed a playback
//! sink. A loopback implementation backs the integration tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::segmenter::SpeakerId;
use crate::{Error, Result};

/// Where a call connects: guild/channel-equivalent identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Guild-equivalent container id
    pub guild_id: u64,
    /// Voice channel id within the guild
    pub channel_id: u64,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.guild_id, self.channel_id)
    }
}

/// Join-time flags
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinFlags {
    /// Join muted
    pub self_mute: bool,
    /// Join deafened
    pub self_deaf: bool,
}

/// One decoded PCM frame from one speaker (48 kHz stereo s16le)
#[derive(Debug, Clone)]
pub struct SpeakerFrame {
    /// Transport-assigned speaker id
    pub speaker: SpeakerId,
    /// Decoded PCM payload
    pub pcm: Vec<u8>,
}

/// Lifecycle events emitted by a live connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established and audio is flowing
    Ready,
    /// Connection lost; may self-heal within the grace window
    Disconnected,
    /// Connection self-healed after a transient disconnect
    Resumed,
    /// Other transport-internal state change (informational)
    StateChanged(String),
}

/// Outbound audio sink attached to a connection
pub trait AudioSink: Send + Sync {
    /// True when no buffer is currently playing
    fn is_idle(&self) -> bool;

    /// Start playing a PCM buffer
    fn play(&self, pcm: Vec<u8>);

    /// Stop playback and release the device
    fn stop(&self);

    /// Register the channel that receives a signal each time the sink
    /// finishes a buffer
    fn set_idle_notify(&self, notify: mpsc::UnboundedSender<()>);
}

/// A live transport connection
pub trait Connection: Send {
    /// Take the lifecycle event stream (yields once)
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Take the decoded per-speaker frame stream (yields once)
    fn take_frames(&mut self) -> Option<mpsc::UnboundedReceiver<SpeakerFrame>>;

    /// Attach the playback sink to this connection
    fn subscribe_sink(&mut self, sink: Arc<dyn AudioSink>);

    /// Tear the connection down; no further events or frames are delivered
    fn destroy(&mut self);
}

/// Voice transport: joins destinations and produces connections
#[async_trait]
pub trait Transport: Send + Sync {
    /// Join a destination
    ///
    /// # Errors
    ///
    /// Returns [`Error::Join`] if the transport cannot establish a connection
    async fn join(&self, destination: Destination, flags: JoinFlags) -> Result<Box<dyn Connection>>;

    /// Create a playback sink compatible with this transport's connections
    fn create_sink(&self) -> Arc<dyn AudioSink>;
}

// ---------------------------------------------------------------------------
// Loopback implementation (tests and local development)
// ---------------------------------------------------------------------------

/// Test-side handles into a loopback connection
#[derive(Clone)]
pub struct LoopbackWires {
    /// Inject lifecycle events
    pub events: mpsc::UnboundedSender<TransportEvent>,
    /// Inject decoded speaker frames
    pub frames: mpsc::UnboundedSender<SpeakerFrame>,
}

#[derive(Default)]
struct LoopbackState {
    fail_joins: u32,
    wires: Option<LoopbackWires>,
    sink: Option<Arc<LoopbackSink>>,
}

/// In-memory transport: frames and events are injected by the test driver
#[derive(Default)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
    joins: AtomicU32,
}

impl LoopbackTransport {
    /// Create a loopback transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` join attempts fail
    pub fn fail_next_joins(&self, n: u32) {
        self.state.lock().unwrap().fail_joins = n;
    }

    /// Number of join attempts observed (successful or not)
    #[must_use]
    pub fn join_count(&self) -> u32 {
        self.joins.load(Ordering::SeqCst)
    }

    /// Handles into the most recent connection
    #[must_use]
    pub fn wires(&self) -> Option<LoopbackWires> {
        self.state.lock().unwrap().wires.clone()
    }

    /// The most recently created sink
    #[must_use]
    pub fn sink(&self) -> Option<Arc<LoopbackSink>> {
        self.state.lock().unwrap().sink.clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn join(
        &self,
        destination: Destination,
        _flags: JoinFlags,
    ) -> Result<Box<dyn Connection>> {
        self.joins.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        if state.fail_joins > 0 {
            state.fail_joins -= 1;
            return Err(Error::Join(format!("simulated join failure to {destination}")));
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        // A loopback join is ready immediately
        let _ = event_tx.send(TransportEvent::Ready);

        state.wires = Some(LoopbackWires {
            events: event_tx,
            frames: frame_tx,
        });

        Ok(Box::new(LoopbackConnection {
            events: Some(event_rx),
            frames: Some(frame_rx),
            destroyed: false,
        }))
    }

    fn create_sink(&self) -> Arc<dyn AudioSink> {
        let sink = Arc::new(LoopbackSink::default());
        self.state.lock().unwrap().sink = Some(Arc::clone(&sink));
        sink
    }
}

struct LoopbackConnection {
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    frames: Option<mpsc::UnboundedReceiver<SpeakerFrame>>,
    destroyed: bool,
}

impl Connection for LoopbackConnection {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }

    fn take_frames(&mut self) -> Option<mpsc::UnboundedReceiver<SpeakerFrame>> {
        self.frames.take()
    }

    fn subscribe_sink(&mut self, _sink: Arc<dyn AudioSink>) {}

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            tracing::debug!("loopback connection destroyed");
        }
    }
}

/// Recording sink used with the loopback transport
#[derive(Default)]
pub struct LoopbackSink {
    busy: AtomicBool,
    stopped: AtomicBool,
    played: Mutex<Vec<Vec<u8>>>,
    notify: Mutex<Option<mpsc::UnboundedSender<()>>>,
}

impl LoopbackSink {
    /// Buffers handed to the sink so far, in play order
    #[must_use]
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().unwrap().clone()
    }

    /// True once `stop` has been called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Simulate the current buffer finishing: become idle and signal the call
    pub fn finish_current(&self) {
        self.busy.store(false, Ordering::SeqCst);
        if let Some(notify) = self.notify.lock().unwrap().as_ref() {
            let _ = notify.send(());
        }
    }
}

impl AudioSink for LoopbackSink {
    fn is_idle(&self) -> bool {
        !self.busy.load(Ordering::SeqCst)
    }

    fn play(&self, pcm: Vec<u8>) {
        self.busy.store(true, Ordering::SeqCst);
        self.played.lock().unwrap().push(pcm);
    }

    fn stop(&self) {
        self.busy.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn set_idle_notify(&self, notify: mpsc::UnboundedSender<()>) {
        *self.notify.lock().unwrap() = Some(notify);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_join_is_ready_immediately() {
        let transport = LoopbackTransport::new();
        let destination = Destination {
            guild_id: 1,
            channel_id: 2,
        };
        let mut conn = transport
            .join(destination, JoinFlags::default())
            .await
            .unwrap();

        let mut events = conn.take_events().unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Ready));
        assert!(conn.take_events().is_none());
    }

    #[tokio::test]
    async fn loopback_join_failure_injection() {
        let transport = LoopbackTransport::new();
        transport.fail_next_joins(2);
        let destination = Destination {
            guild_id: 1,
            channel_id: 2,
        };

        for _ in 0..2 {
            assert!(transport
                .join(destination, JoinFlags::default())
                .await
                .is_err());
        }
        assert!(transport
            .join(destination, JoinFlags::default())
            .await
            .is_ok());
        assert_eq!(transport.join_count(), 3);
    }

    #[test]
    fn loopback_sink_records_and_signals() {
        let sink = LoopbackSink::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.set_idle_notify(tx);

        assert!(sink.is_idle());
        sink.play(vec![1, 2, 3]);
        assert!(!sink.is_idle());

        sink.finish_current();
        assert!(sink.is_idle());
        assert!(rx.try_recv().is_ok());
        assert_eq!(sink.played(), vec![vec![1, 2, 3]]);
    }
}
