// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Framing and envelope codec for lockstep protocol messages.
//!
//! Two layers, matching the external transport contract:
//! - frame: `[topic_len: u16 LE][topic: UTF-8][payload: remaining bytes]`
//! - envelope: `{ v, ts, msg }` JSON, carried as the frame's payload.

use crate::{Envelope, NodeMessage, TransportMessage, NODE_TOPIC, WIRE_VERSION};
use thiserror::Error;

/// Errors raised by the wire codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Topic string exceeds the 65,535-byte length cap.
    #[error("topic length {0} exceeds u16 cap")]
    TopicTooLong(usize),
    /// Frame is shorter than the topic-length prefix, or the declared
    /// topic/payload extends past the end of the buffer.
    #[error("truncated frame")]
    TruncatedFrame,
    /// Topic bytes are not valid UTF-8.
    #[error("topic is not valid UTF-8")]
    InvalidTopic,
    /// Envelope JSON failed to decode.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// Envelope declared a `v` other than [`WIRE_VERSION`].
    #[error("unsupported wire version: {0}")]
    UnsupportedVersion(String),
}

/// Encode `topic` and `payload` into a single length-prefixed frame.
pub fn encode_frame(topic: &str, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let topic_bytes = topic.as_bytes();
    if topic_bytes.len() > u16::MAX as usize {
        return Err(WireError::TopicTooLong(topic_bytes.len()));
    }
    let mut out = Vec::with_capacity(2 + topic_bytes.len() + payload.len());
    out.extend_from_slice(&(topic_bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(topic_bytes);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode a frame into its topic and payload slice.
pub fn decode_frame(bytes: &[u8]) -> Result<(String, &[u8]), WireError> {
    if bytes.len() < 2 {
        return Err(WireError::TruncatedFrame);
    }
    let topic_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let topic_start = 2;
    let topic_end = topic_start
        .checked_add(topic_len)
        .ok_or(WireError::TruncatedFrame)?;
    if bytes.len() < topic_end {
        return Err(WireError::TruncatedFrame);
    }
    let topic = std::str::from_utf8(&bytes[topic_start..topic_end])
        .map_err(|_| WireError::InvalidTopic)?
        .to_string();
    Ok((topic, &bytes[topic_end..]))
}

/// Serialize `msg` as a v1 JSON envelope stamped with `ts`.
pub fn encode_envelope(msg: &NodeMessage, ts: u64) -> Result<Vec<u8>, WireError> {
    let envelope = Envelope::new(msg.clone(), ts);
    serde_json::to_vec(&envelope).map_err(|err| WireError::MalformedFrame(err.to_string()))
}

/// Parse a v1 JSON envelope, rejecting any other `v`.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, WireError> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|err| WireError::MalformedFrame(err.to_string()))?;
    if envelope.v != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion(envelope.v));
    }
    Ok(envelope)
}

/// Encode `msg` as a complete [`TransportMessage`] on [`NODE_TOPIC`],
/// ready to hand to `Transport::broadcast`/`send`.
pub fn encode_message(msg: &NodeMessage, ts: u64) -> Result<TransportMessage, WireError> {
    let body = encode_envelope(msg, ts)?;
    let payload = encode_frame(NODE_TOPIC, &body)?;
    Ok(TransportMessage {
        topic: NODE_TOPIC.to_string(),
        payload,
    })
}

/// Decode a frame previously produced by [`encode_message`] back into its
/// message and timestamp.
pub fn decode_message(frame: &[u8]) -> Result<(NodeMessage, u64), WireError> {
    let (_topic, body) = decode_frame(frame)?;
    let envelope = decode_envelope(body)?;
    Ok((envelope.msg, envelope.ts))
}
