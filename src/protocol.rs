//! Wire codec for the conversation socket
//!
//! The server interleaves two frame kinds: text frames tagged with a literal
//! `TXT:` prefix carrying a JSON event, and binary frames carrying
//! synthesized speech. The client side of the protocol is binary-only —
//! encoded microphone chunks, never structured text.

use bytes::Bytes;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;

/// Literal prefix marking a structured text frame
pub const TEXT_FRAME_TAG: &str = "TXT:";

/// A classified frame received from the conversational agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A transcript line to append to the session log
    Transcript(String),

    /// A recognized text event the client takes no action on
    Ignored,

    /// A synthesized speech payload destined for playback
    Audio(Bytes),
}

/// Structured event carried after the text frame tag
#[derive(Debug, Deserialize)]
struct ServerEvent {
    #[serde(rename = "type")]
    kind: String,

    #[serde(default)]
    data: serde_json::Value,
}

/// Classify a raw socket message as text event or audio payload.
///
/// Returns `None` for control frames and for undecodable text frames;
/// decode failures are logged and never escalate past this function.
#[must_use]
pub fn decode(msg: &Message) -> Option<InboundFrame> {
    match msg {
        Message::Text(text) => decode_text(text.as_str()),
        Message::Binary(payload) => Some(InboundFrame::Audio(payload.clone())),
        _ => None,
    }
}

/// Decode the text side of the protocol.
///
/// Only `type == "transcript"` is action-bearing; other recognized events
/// are accepted and ignored without error.
#[must_use]
pub fn decode_text(text: &str) -> Option<InboundFrame> {
    let body = text.strip_prefix(TEXT_FRAME_TAG)?;

    match serde_json::from_str::<ServerEvent>(body) {
        Ok(event) if event.kind == "transcript" => match event.data.as_str() {
            Some(line) => Some(InboundFrame::Transcript(line.to_string())),
            None => {
                tracing::warn!("transcript event without string data");
                None
            }
        },
        Ok(event) => {
            tracing::debug!(kind = %event.kind, "ignoring unhandled event");
            Some(InboundFrame::Ignored)
        }
        Err(e) => {
            tracing::warn!(error = %e, "malformed text frame dropped");
            None
        }
    }
}

/// Encode an outbound microphone chunk.
///
/// Outbound frames are always raw binary; callers must preserve this
/// asymmetry — the current protocol has no client-to-server text frames.
#[must_use]
pub fn encode_chunk(chunk: Bytes) -> Message {
    Message::Binary(chunk)
}
