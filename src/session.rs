//! Session controller — the user-facing state machine
//!
//! One authoritative [`SessionState`] replaces the scattered
//! recording/processing flags of the web client, so combinations like
//! "recording while processing" are unrepresentable. The controller owns
//! the transcript log and drives the capture pipeline; playback runs
//! independently.

use crate::capture::Capture;
use crate::connection::{ConnectionEvent, ConnectionHandle, ConnectionState};
use crate::{Error, Result};

/// Coarse state of a practice session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection activity yet
    Idle,
    /// First connection attempt in progress
    Connecting,
    /// Connected and ready for a speaking turn
    Open,
    /// Microphone held, chunks streaming
    Recording,
    /// Turn ended, waiting on the coach
    AwaitingResponse,
    /// Connection lost, reconnect in progress; toggle disabled
    Reconnecting,
}

impl SessionState {
    /// Coach status line shown for this state
    #[must_use]
    pub const fn coach_line(self) -> &'static str {
        match self {
            Self::Idle | Self::Connecting => "Connecting to coach...",
            Self::Open => "Ready to chat!",
            Self::Recording => "Listening carefully...",
            Self::AwaitingResponse => "Processing your response...",
            Self::Reconnecting => "Connection lost. Retrying...",
        }
    }

    /// Coach affect shown alongside the status line
    #[must_use]
    pub const fn coach_affect(self) -> &'static str {
        match self {
            Self::Idle | Self::Connecting | Self::AwaitingResponse => "\u{1f914}",
            Self::Open => "\u{1f60a}",
            Self::Recording => "\u{1f442}",
            Self::Reconnecting => "\u{1f625}",
        }
    }
}

/// Coordinates capture, connection and transcript for one session
pub struct SessionController {
    state: SessionState,
    transcript: Vec<String>,
    capture: Box<dyn Capture>,
    conn: ConnectionHandle,
}

impl SessionController {
    /// Create a controller in the `Idle` state
    #[must_use]
    pub fn new(conn: ConnectionHandle, capture: Box<dyn Capture>) -> Self {
        Self {
            state: SessionState::Idle,
            transcript: Vec::new(),
            capture,
            conn,
        }
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Transcript lines in receipt order
    #[must_use]
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Begin a speaking turn.
    ///
    /// Clears the previous turn's transcript and starts the capture
    /// pipeline. Idempotent while already recording.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] if the connection is not open (state is
    /// left unchanged), or the capture error if the microphone cannot be
    /// acquired (state and transcript are left unchanged, no retry).
    pub fn start(&mut self) -> Result<()> {
        if self.state == SessionState::Recording {
            return Ok(());
        }
        if !self.conn.is_open() {
            return Err(Error::NotReady(
                "the coach connection is not open".to_string(),
            ));
        }

        self.capture.start(self.conn.clone())?;
        self.transcript.clear();
        self.state = SessionState::Recording;
        tracing::info!("speaking turn started");
        Ok(())
    }

    /// End the speaking turn and wait for the coach.
    ///
    /// Releases the microphone. The transcript survives until the next
    /// `start`. A stop with no active recording is a no-op.
    pub fn stop(&mut self) {
        if self.state != SessionState::Recording {
            return;
        }
        self.capture.stop();
        self.state = SessionState::AwaitingResponse;
        tracing::info!("speaking turn ended");
    }

    /// Apply a connection event to the session
    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Transcript(line) => self.transcript.push(line),
            ConnectionEvent::State(link) => self.on_link_state(link),
        }
    }

    /// Fold a connection lifecycle change into the session state.
    ///
    /// Frame arrival never changes the coarse state; only link transitions
    /// and the user toggle do. A link loss always stops any active
    /// recording and releases the device.
    fn on_link_state(&mut self, link: ConnectionState) {
        match link {
            ConnectionState::Connecting => {
                if self.state == SessionState::Idle {
                    self.state = SessionState::Connecting;
                }
            }
            ConnectionState::Open => {
                if matches!(
                    self.state,
                    SessionState::Idle | SessionState::Connecting | SessionState::Reconnecting
                ) {
                    self.state = SessionState::Open;
                }
            }
            ConnectionState::Closed => {
                if self.state == SessionState::Recording {
                    self.capture.stop();
                    tracing::warn!("connection lost mid-turn, microphone released");
                }
                self.state = SessionState::Reconnecting;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coach_lines_track_session_state() {
        assert_eq!(SessionState::Open.coach_line(), "Ready to chat!");
        assert_eq!(SessionState::Recording.coach_line(), "Listening carefully...");
        assert_eq!(
            SessionState::AwaitingResponse.coach_line(),
            "Processing your response..."
        );
        assert_eq!(
            SessionState::Reconnecting.coach_line(),
            "Connection lost. Retrying..."
        );
        assert_eq!(SessionState::Connecting.coach_line(), "Connecting to coach...");
    }
}
