//! Cadence - Real-time multi-party voice conversation core
//!
//! This library implements the call-side core of a voice assistant that sits
//! in a group voice channel:
//! - Per-speaker utterance segmentation (energy VAD with pre-roll)
//! - Single-flight STT -> chat -> TTS round trips with per-speaker history
//! - Bounded processing and playback queues
//! - A call state machine with grace-window resume and bounded reconnects
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Voice Transport                     │
//! │   join / events / decoded speaker frames / sink     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Call Worker                          │
//! │  Segmenters │ Processing Queue │ Playback Queue     │
//! └────────────────────┬────────────────────────────────┘
//!                      │ one round trip at a time
//! ┌────────────────────▼────────────────────────────────┐
//! │               Pipeline Stage                         │
//! │   convert │ STT │ chat completion │ TTS │ convert   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod call;
pub mod clock;
pub mod config;
pub mod convert;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod provider;
pub mod queue;
pub mod segmenter;
pub mod services;
pub mod transport;

pub use call::{Call, CallEvent, CallStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use convert::{FfmpegConverter, FormatConverter, NativeConverter};
pub use error::{Error, Result};
pub use history::{ConversationHistory, Role, Turn};
pub use pipeline::PipelineStage;
pub use provider::{CallProvider, StartCallParams};
pub use segmenter::{FlushReason, SpeakerId, Utterance, UtteranceSegmenter};
pub use transport::{
    AudioSink, Connection, Destination, JoinFlags, LoopbackSink, LoopbackTransport, LoopbackWires,
    SpeakerFrame, Transport, TransportEvent,
};
