//! Call session state machine
//!
//! One `Call` is one live voice session: a worker task owns all per-call
//! state (segmenters, queues, histories) and processes every event on a
//! single logical thread: inbound frames, transport lifecycle, sink-idle
//! signals, pipeline completions, and host commands. Collaborator round
//! trips are the only suspension points; ingestion never blocks on them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::clock::Clock;
use crate::config::Config;
use crate::history::ConversationHistory;
use crate::pipeline::PipelineStage;
use crate::queue::{PlaybackQueue, ProcessingQueue};
use crate::segmenter::{SpeakerId, UtteranceSegmenter};
use crate::transport::{
    AudioSink, Connection, Destination, JoinFlags, SpeakerFrame, Transport, TransportEvent,
};
use crate::{Error, Result};

/// Lifecycle status of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Transport join requested
    Connecting,
    /// Normal operation
    Connected,
    /// Transport lost; bounded re-join attempts in progress
    Reconnecting,
    /// Terminal: ended normally or reconnects exhausted
    Disconnected,
    /// Terminal: join failed
    Failed,
}

impl CallStatus {
    /// True for the two terminal states
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// Events a call emits to its host
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The call moved to a new status
    StatusChanged(CallStatus),
    /// A speaker finished an utterance
    AudioReceived {
        /// Speaker the audio belongs to
        speaker: SpeakerId,
        /// Utterance payload (48 kHz stereo s16le)
        pcm: Vec<u8>,
        /// Emission time
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Host commands into the call worker
enum Command {
    /// Inject raw PCM into the playback queue, bypassing the pipeline
    SendAudio(Vec<u8>),
    /// End the call
    End,
}

/// Handle to a live call
///
/// Cheap to clone via `Arc`. After the call reaches a terminal state,
/// `send_audio` reports [`Error::StaleSession`]; `end` stays an idempotent
/// no-op.
#[derive(Debug)]
pub struct Call {
    id: uuid::Uuid,
    destination: Destination,
    flags: JoinFlags,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<CallStatus>,
    events: std::sync::Mutex<Option<mpsc::UnboundedReceiver<CallEvent>>>,
}

impl Call {
    /// Stable call identity
    #[must_use]
    pub const fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Destination this call is connected to
    #[must_use]
    pub const fn destination(&self) -> Destination {
        self.destination
    }

    /// Join flags the call was started with
    #[must_use]
    pub const fn flags(&self) -> JoinFlags {
        self.flags
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> CallStatus {
        *self.status.borrow()
    }

    /// Take the outbound event stream (yields once)
    #[must_use]
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<CallEvent>> {
        self.events.lock().unwrap().take()
    }

    /// Wait until the call reaches a terminal status
    pub async fn closed(&self) {
        let mut status = self.status.clone();
        while !status.borrow_and_update().is_terminal() {
            if status.changed().await.is_err() {
                return;
            }
        }
    }

    /// Queue raw PCM for playback, bypassing the conversation pipeline
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleSession`] if the call has ended
    pub fn send_audio(&self, pcm: Vec<u8>) -> Result<()> {
        // The terminal status is published before the worker exits, so this
        // check covers the window where the command channel is still open
        // but teardown has already run.
        if self.status().is_terminal() {
            return Err(Error::StaleSession(self.id.to_string()));
        }
        self.commands
            .send(Command::SendAudio(pcm))
            .map_err(|_| Error::StaleSession(self.id.to_string()))
    }

    /// End the call, tearing down all owned resources.
    ///
    /// Safe no-op if the call already ended.
    pub fn end(&self) {
        let _ = self.commands.send(Command::End);
    }
}

/// Everything a worker needs, assembled by the provider
pub(crate) struct CallContext {
    pub id: uuid::Uuid,
    pub destination: Destination,
    pub flags: JoinFlags,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub transport: Arc<dyn Transport>,
    pub pipeline: Option<Arc<PipelineStage>>,
}

/// Spawn the worker task and return the host-facing handle
pub(crate) fn spawn(ctx: CallContext) -> Arc<Call> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(CallStatus::Connecting);
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let (idle_tx, idle_rx) = mpsc::unbounded_channel();

    let sink = ctx.transport.create_sink();
    sink.set_idle_notify(idle_tx.clone());

    let call = Arc::new(Call {
        id: ctx.id,
        destination: ctx.destination,
        flags: ctx.flags,
        commands: command_tx,
        status: status_rx,
        events: std::sync::Mutex::new(Some(event_rx)),
    });

    let worker = CallWorker {
        events_out: event_tx,
        status_tx,
        sink,
        segmenters: HashMap::new(),
        histories: HashMap::new(),
        processing: ProcessingQueue::new(ctx.config.queues.processing_capacity),
        playback: PlaybackQueue::new(ctx.config.queues.playback_capacity),
        in_flight: false,
        done_tx,
        _idle_keepalive: idle_tx,
        ctx,
    };

    tokio::spawn(worker.run(command_rx, done_rx, idle_rx));

    call
}

/// Result of one pipeline round trip, handed back to the worker
struct PipelineOutcome {
    speaker: SpeakerId,
    history: ConversationHistory,
    output: Option<Vec<u8>>,
}

/// Outcome of a transport disruption
enum Disruption {
    /// Transport self-healed within the grace window; no state reset
    Healed,
    /// Re-join succeeded; carries the new connection and its streams
    Rejoined(
        Box<dyn Connection>,
        mpsc::UnboundedReceiver<TransportEvent>,
        mpsc::UnboundedReceiver<SpeakerFrame>,
    ),
    /// Retry bound exceeded
    GiveUp,
    /// Host ended the call during recovery
    Ended,
}

struct CallWorker {
    ctx: CallContext,
    events_out: mpsc::UnboundedSender<CallEvent>,
    status_tx: watch::Sender<CallStatus>,
    sink: Arc<dyn AudioSink>,
    segmenters: HashMap<SpeakerId, UtteranceSegmenter>,
    histories: HashMap<SpeakerId, ConversationHistory>,
    processing: ProcessingQueue,
    playback: PlaybackQueue,
    in_flight: bool,
    done_tx: mpsc::UnboundedSender<PipelineOutcome>,
    /// Keeps the idle channel open even if the sink drops its sender
    _idle_keepalive: mpsc::UnboundedSender<()>,
}

impl CallWorker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut done: mpsc::UnboundedReceiver<PipelineOutcome>,
        mut idle: mpsc::UnboundedReceiver<()>,
    ) {
        tracing::info!(
            call = %self.ctx.id,
            destination = %self.ctx.destination,
            "call connecting"
        );

        let (mut connection, mut events, mut frames) = match self.attempt_join().await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(call = %self.ctx.id, error = %e, "join failed");
                self.terminate(None, CallStatus::Failed);
                return;
            }
        };
        self.set_status(CallStatus::Connected);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::SendAudio(pcm)) => {
                        self.playback.push(pcm);
                        self.kick_sink();
                    }
                    Some(Command::End) | None => {
                        self.terminate(Some(&mut connection), CallStatus::Disconnected);
                        return;
                    }
                },
                Some(frame) = frames.recv() => self.handle_frame(&frame),
                Some(outcome) = done.recv() => self.handle_pipeline_done(outcome),
                Some(()) = idle.recv() => self.kick_sink(),
                event = events.recv() => match event {
                    Some(TransportEvent::Disconnected) | None => {
                        match self.handle_disruption(&mut events, &mut commands).await {
                            Disruption::Healed => {}
                            Disruption::Rejoined(new_connection, new_events, new_frames) => {
                                connection.destroy();
                                connection = new_connection;
                                events = new_events;
                                frames = new_frames;
                                self.set_status(CallStatus::Connected);
                            }
                            Disruption::GiveUp => {
                                self.terminate(Some(&mut connection), CallStatus::Disconnected);
                                return;
                            }
                            Disruption::Ended => {
                                self.terminate(Some(&mut connection), CallStatus::Disconnected);
                                return;
                            }
                        }
                    }
                    Some(TransportEvent::StateChanged(state)) => {
                        tracing::trace!(call = %self.ctx.id, state, "transport state change");
                    }
                    Some(TransportEvent::Ready | TransportEvent::Resumed) => {}
                },
            }
        }
    }

    /// One bounded transport join: connect, take the streams, wait for ready,
    /// and attach the playback sink.
    async fn attempt_join(
        &self,
    ) -> Result<(
        Box<dyn Connection>,
        mpsc::UnboundedReceiver<TransportEvent>,
        mpsc::UnboundedReceiver<SpeakerFrame>,
    )> {
        let join_timeout = self.ctx.config.reconnect.join_timeout;

        let mut connection = tokio::time::timeout(
            join_timeout,
            self.ctx.transport.join(self.ctx.destination, self.ctx.flags),
        )
        .await
        .map_err(|_| Error::Join("transport join timed out".to_string()))??;

        let mut events = connection
            .take_events()
            .ok_or_else(|| Error::Transport("event stream unavailable".to_string()))?;
        let frames = connection
            .take_frames()
            .ok_or_else(|| Error::Transport("frame stream unavailable".to_string()))?;

        let ready = tokio::time::timeout(join_timeout, async {
            while let Some(event) = events.recv().await {
                if event == TransportEvent::Ready {
                    return true;
                }
            }
            false
        })
        .await;

        match ready {
            Ok(true) => {
                connection.subscribe_sink(Arc::clone(&self.sink));
                Ok((connection, events, frames))
            }
            Ok(false) => Err(Error::Transport(
                "connection closed before becoming ready".to_string(),
            )),
            Err(_) => Err(Error::Join("timed out waiting for ready".to_string())),
        }
    }

    /// Transport disconnect handling: wait out the grace window for a
    /// self-heal, then run the bounded reconnect loop.
    async fn handle_disruption(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Disruption {
        let reconnect = self.ctx.config.reconnect;
        tracing::warn!(
            call = %self.ctx.id,
            grace_ms = reconnect.resume_grace.as_millis() as u64,
            "transport disconnected, waiting for self-heal"
        );

        let grace = tokio::time::sleep(reconnect.resume_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                () = &mut grace => break,
                event = events.recv() => match event {
                    Some(TransportEvent::Resumed) => {
                        tracing::info!(call = %self.ctx.id, "transport resumed");
                        return Disruption::Healed;
                    }
                    Some(_) => {}
                    None => break,
                },
                cmd = commands.recv() => match cmd {
                    Some(Command::SendAudio(pcm)) => self.playback.push(pcm),
                    Some(Command::End) | None => return Disruption::Ended,
                },
            }
        }

        self.set_status(CallStatus::Reconnecting);
        // Segmenter state from the dead connection is meaningless; fresh
        // segmenters are created per speaker once frames flow again.
        self.segmenters.clear();

        for attempt in 1..=reconnect.max_attempts {
            let backoff = reconnect.backoff_unit * attempt;
            tracing::info!(
                call = %self.ctx.id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "reconnect attempt"
            );

            let delay = tokio::time::sleep(backoff);
            tokio::pin!(delay);
            loop {
                tokio::select! {
                    () = &mut delay => break,
                    cmd = commands.recv() => match cmd {
                        Some(Command::SendAudio(pcm)) => self.playback.push(pcm),
                        Some(Command::End) | None => return Disruption::Ended,
                    },
                }
            }

            match self.attempt_join().await {
                Ok((connection, events, frames)) => {
                    tracing::info!(call = %self.ctx.id, attempt, "reconnected");
                    return Disruption::Rejoined(connection, events, frames);
                }
                Err(e) => {
                    tracing::warn!(call = %self.ctx.id, attempt, error = %e, "reconnect failed");
                }
            }
        }

        tracing::error!(
            call = %self.ctx.id,
            attempts = reconnect.max_attempts,
            "reconnect attempts exhausted"
        );
        Disruption::GiveUp
    }

    /// Feed one decoded frame through its speaker's segmenter
    fn handle_frame(&mut self, frame: &SpeakerFrame) {
        let segmenter = self.segmenters.entry(frame.speaker).or_insert_with(|| {
            tracing::debug!(call = %self.ctx.id, speaker = frame.speaker, "speaker stream started");
            UtteranceSegmenter::new(
                frame.speaker,
                self.ctx.config.vad,
                Arc::clone(&self.ctx.clock),
            )
        });

        if let Some(utterance) = segmenter.push(&frame.pcm) {
            let _ = self.events_out.send(CallEvent::AudioReceived {
                speaker: utterance.speaker,
                pcm: utterance.pcm.clone(),
                timestamp: utterance.emitted_at,
            });

            if self.ctx.pipeline.is_some() {
                self.processing.enqueue(utterance.speaker, utterance.pcm);
                self.maybe_dispatch();
            }
        }
    }

    /// Start the next round trip if none is in flight
    fn maybe_dispatch(&mut self) {
        if self.in_flight {
            return;
        }
        let Some(pipeline) = self.ctx.pipeline.clone() else {
            return;
        };
        let Some(entry) = self.processing.pop() else {
            return;
        };

        self.in_flight = true;
        // The speaker's history travels with the task; single-flight
        // guarantees nothing else touches it meanwhile.
        let history = self.histories.remove(&entry.speaker).unwrap_or_default();
        let done = self.done_tx.clone();

        tokio::spawn(async move {
            let (history, output) = pipeline.process(entry.speaker, entry.pcm, history).await;
            let _ = done.send(PipelineOutcome {
                speaker: entry.speaker,
                history,
                output,
            });
        });
    }

    fn handle_pipeline_done(&mut self, outcome: PipelineOutcome) {
        self.histories.insert(outcome.speaker, outcome.history);
        if let Some(pcm) = outcome.output {
            self.playback.push(pcm);
            self.kick_sink();
        }
        self.in_flight = false;
        self.maybe_dispatch();
    }

    /// Hand the oldest queued buffer to the sink if it is idle
    fn kick_sink(&mut self) {
        if self.sink.is_idle() {
            if let Some(pcm) = self.playback.pop() {
                self.sink.play(pcm);
            }
        }
    }

    /// Terminal teardown: destroy the connection, stop the sink, drop all
    /// buffered state, and emit the terminal status exactly once.
    fn terminate(&mut self, connection: Option<&mut Box<dyn Connection>>, status: CallStatus) {
        debug_assert!(status.is_terminal());

        if let Some(connection) = connection {
            connection.destroy();
        }
        self.sink.stop();
        self.segmenters.clear();
        self.histories.clear();
        self.processing.clear();
        self.playback.clear();
        self.set_status(status);

        tracing::info!(call = %self.ctx.id, status = ?status, "call ended");
    }

    fn set_status(&self, status: CallStatus) {
        if *self.status_tx.borrow() == status {
            return;
        }
        let _ = self.status_tx.send(status);
        let _ = self.events_out.send(CallEvent::StatusChanged(status));
        tracing::debug!(call = %self.ctx.id, status = ?status, "status changed");
    }
}
