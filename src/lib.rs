//! FluentNow client - real-time voice conversation practice
//!
//! This library implements the duplex audio client that connects a learner
//! to the remote conversation coach:
//! - Microphone capture sliced into fixed-interval chunks
//! - A persistent WebSocket with an unconditional reconnect policy
//! - Strictly ordered playback of the coach's synthesized speech
//! - A session state machine behind a single speak/stop toggle
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Session Controller                    │
//! │      toggle  │  transcript log  │  coach status      │
//! └───────┬──────────────────────────────────▲───────────┘
//!         │ start/stop                       │ events
//! ┌───────▼───────┐   chunks   ┌─────────────┴───────────┐
//! │ Audio Capture ├───────────►│   Connection Manager    │
//! │  (cpal, WAV)  │ if open    │ (websocket + reconnect) │
//! └───────────────┘            └─────┬───────────────────┘
//!                                    │ frames (codec)
//!                          ┌─────────▼─────────┐
//!                          │  Playback Queue   │
//!                          │ (FIFO, one at a   │
//!                          │  time, self-heal) │
//!                          └───────────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod connection;
pub mod error;
pub mod playback;
pub mod protocol;
pub mod session;

pub use capture::{Capture, MicCapture};
pub use config::Config;
pub use connection::{Connection, ConnectionEvent, ConnectionHandle, ConnectionState};
pub use error::{Error, Result};
pub use playback::{AudioSink, PlaybackQueue, SpeakerSink};
pub use protocol::InboundFrame;
pub use session::{SessionController, SessionState};
