//! Persistent socket to the conversational agent
//!
//! One connection task per session owns the socket and its lifecycle.
//! Every close, whatever the cause, schedules a fresh attempt — the client
//! retries for as long as the session lives. Nothing is buffered across a
//! reconnect: chunks are accepted only while the socket is open, and stale
//! chunks from a dead link are discarded rather than replayed.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::playback::PlaybackQueue;
use crate::protocol::{self, InboundFrame};

/// Delay before each reconnect attempt. There is deliberately no backoff
/// ceiling and no retry cap.
const RECONNECT_DELAY: Duration = Duration::from_millis(800);

/// Lifecycle state of the conversation socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connection attempt is in progress
    Connecting,
    /// The socket is open; outbound chunks are accepted
    Open,
    /// The socket is down; a reconnect will be scheduled
    Closed,
}

/// Event delivered to the session controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The socket changed lifecycle state
    State(ConnectionState),
    /// The agent sent a transcript line
    Transcript(String),
}

/// Cloneable handle for sending chunks and observing connection state
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl ConnectionHandle {
    /// Assemble a handle from its channels
    #[must_use]
    pub fn new(
        state: watch::Receiver<ConnectionState>,
        outbound: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self { state, outbound }
    }

    /// Current lifecycle state of the socket
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// True while the socket accepts outbound chunks
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Hand a chunk to the socket if it is currently open.
    ///
    /// A chunk produced while the socket is not open is dropped here and
    /// never transmitted later; returns whether the chunk was accepted.
    pub fn send_chunk(&self, chunk: Bytes) -> bool {
        if !self.is_open() {
            return false;
        }
        self.outbound.send(chunk).is_ok()
    }
}

/// Owns the connection task for one conversation session
pub struct Connection;

impl Connection {
    /// Spawn the connection task against the given endpoint.
    ///
    /// Inbound audio payloads go straight to `playback`; transcript lines
    /// and state changes arrive on the returned event channel. The task
    /// reconnects unconditionally and runs until every handle clone is
    /// dropped.
    #[must_use]
    pub fn spawn(
        url: String,
        playback: PlaybackQueue,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_link(url, playback, state_tx, event_tx, outbound_rx));

        (ConnectionHandle::new(state_rx, outbound_tx), event_rx)
    }
}

/// Connection task: connect, pump frames, reconnect on any close
async fn run_link(
    url: String,
    playback: PlaybackQueue,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) {
    loop {
        // Chunks accepted by a previous link but never flushed are stale;
        // drop them instead of replaying on the new socket. Doubles as the
        // liveness check: a disconnected channel means the session is gone.
        if clear_backlog(&mut outbound) {
            tracing::debug!("session handle dropped, connection task ending");
            return;
        }

        publish(&state, &events, ConnectionState::Connecting);

        let socket = match connect_async(url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                tracing::warn!(error = %e, url = %url, "connect failed");
                publish(&state, &events, ConnectionState::Closed);
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        tracing::info!(url = %url, "conversation socket open");
        publish(&state, &events, ConnectionState::Open);

        let (mut sink, mut stream) = socket.split();

        loop {
            tokio::select! {
                chunk = outbound.recv() => match chunk {
                    Some(chunk) => {
                        if let Err(e) = sink.send(protocol::encode_chunk(chunk)).await {
                            tracing::warn!(error = %e, "chunk send failed");
                            break;
                        }
                    }
                    None => {
                        // Session dropped its handle: end the task for good.
                        let _ = sink.close().await;
                        publish(&state, &events, ConnectionState::Closed);
                        tracing::debug!("session ended, connection task ending");
                        return;
                    }
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "server closed the conversation");
                        break;
                    }
                    Some(Ok(msg)) => dispatch(&msg, &playback, &events),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "socket error");
                        break;
                    }
                    None => break,
                },
            }
        }

        publish(&state, &events, ConnectionState::Closed);
        tracing::info!(
            retry_in_ms = u64::try_from(RECONNECT_DELAY.as_millis()).unwrap_or(u64::MAX),
            "reconnecting"
        );
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Route one inbound frame to its consumer
fn dispatch(msg: &Message, playback: &PlaybackQueue, events: &mpsc::UnboundedSender<ConnectionEvent>) {
    match protocol::decode(msg) {
        Some(InboundFrame::Transcript(line)) => {
            let _ = events.send(ConnectionEvent::Transcript(line));
        }
        Some(InboundFrame::Audio(payload)) => playback.enqueue(payload),
        Some(InboundFrame::Ignored) | None => {}
    }
}

/// Publish a state change to the watch and, if it changed, the event stream
fn publish(
    state: &watch::Sender<ConnectionState>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    next: ConnectionState,
) {
    let prev = state.send_replace(next);
    if prev != next {
        let _ = events.send(ConnectionEvent::State(next));
    }
}

/// Discard queued chunks; true if the sending side is gone
fn clear_backlog(outbound: &mut mpsc::UnboundedReceiver<Bytes>) -> bool {
    loop {
        match outbound.try_recv() {
            Ok(_) => {}
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => return true,
        }
    }
}
