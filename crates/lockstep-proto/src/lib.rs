// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema for the lockstep ordering protocol (proposals, seals, commits,
//! clock sync) plus the framing used to carry it over an opaque transport.

use serde::{Deserialize, Serialize};

pub mod wire;

/// Opaque, globally-unique-within-a-room peer identifier.
///
/// Identity is assigned by the embedding application; it may be a
/// public-key hex string, but this crate treats it as an uninterpreted
/// byte string ordered lexicographically (see the commit-ordering rule).
pub type PeerId = String;

/// Logical room identifier. Messages carrying a mismatched `room_id` are
/// silently dropped by the ordering engine (see [`NodeMessage`]).
pub type RoomId = String;

/// Non-negative logical ordering tick. `-1` is used as the sentinel for
/// "clock not yet started"; callers should treat any negative value that
/// way rather than as a valid tick.
pub type Tick = i64;

/// Per-(tick, author) monotonically increasing sequence number assigned by
/// the author, starting at 0. `-1` denotes "no action sent" in a seal.
pub type Seq = i64;

/// Monotonic 1-based position of a [`Commit`] in an action log.
pub type Height = u64;

/// Wire protocol version carried in every [`Envelope`].
pub const WIRE_VERSION: &str = "v1";

/// Topic used for all lockstep ordering protocol traffic.
pub const NODE_TOPIC: &str = "node";

/// An action proposed (but not yet committed) by its author, carried in
/// `ACTION_PROPOSE` and echoed back (with real `seq`) in `ACTION_COMMIT`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedAction {
    /// Author of the action.
    pub peer_id: PeerId,
    /// Author-opaque action body. Decoded by the embedding rule kernel.
    pub payload: serde_json::Value,
    /// Per-(tick, author) sequence number.
    pub seq: Seq,
}

/// A deterministically ordered, gap-free batch of actions committed for a
/// single ordering tick. See the ordering engine's commit-ordering rule for
/// how `actions` is derived from the proposal buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commit {
    /// 1-based, gap-free position in the action log.
    pub height: Height,
    /// The ordering tick this commit closes.
    pub ordering_tick: Tick,
    /// Actions in final, deterministic order.
    pub actions: Vec<SignedAction>,
}

/// Protocol messages exchanged between lockstep ordering peers.
///
/// Tagged by `type` on the wire using the stable UPPER_SNAKE names below;
/// every variant carries `room_id` so a receiver can cheaply discard
/// messages belonging to a different room without touching engine state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum NodeMessage {
    /// A peer proposes an action for `tick`. Buffered locally and
    /// rebroadcast by every recipient's transport (best-effort).
    #[serde(rename = "ACTION_PROPOSE")]
    ActionPropose {
        room_id: RoomId,
        peer_id: PeerId,
        tick: Tick,
        seq: Seq,
        payload: serde_json::Value,
    },
    /// A peer declares it will send no further actions for `tick`.
    /// `last_seq` is the highest `seq` sent for `tick`, or `-1`.
    #[serde(rename = "ACTION_SEAL")]
    ActionSeal {
        room_id: RoomId,
        peer_id: PeerId,
        tick: Tick,
        last_seq: Seq,
    },
    /// Advisory gossip of a locally computed commit. Never authoritative:
    /// every peer recomputes commits from its own buffers (divergence
    /// detection against this message is an explicit non-goal).
    #[serde(rename = "ACTION_COMMIT")]
    ActionCommit {
        room_id: RoomId,
        tick: Tick,
        height: Height,
        actions: Vec<SignedAction>,
    },
    /// Tick-warp hint: "I am at tick `tick`". Recipients behind `tick`
    /// warp their local clock forward (monotone, never backward).
    #[serde(rename = "SYNC_CLOCK")]
    SyncClock {
        room_id: RoomId,
        peer_id: PeerId,
        tick: Tick,
    },
}

impl NodeMessage {
    /// The room this message belongs to, used to cheaply drop
    /// cross-room traffic before it reaches engine state.
    pub fn room_id(&self) -> &str {
        match self {
            NodeMessage::ActionPropose { room_id, .. }
            | NodeMessage::ActionSeal { room_id, .. }
            | NodeMessage::ActionCommit { room_id, .. }
            | NodeMessage::SyncClock { room_id, .. } => room_id,
        }
    }

    /// Canonical wire tag for this variant (mirrors the `type` discriminant).
    pub fn type_tag(&self) -> &'static str {
        match self {
            NodeMessage::ActionPropose { .. } => "ACTION_PROPOSE",
            NodeMessage::ActionSeal { .. } => "ACTION_SEAL",
            NodeMessage::ActionCommit { .. } => "ACTION_COMMIT",
            NodeMessage::SyncClock { .. } => "SYNC_CLOCK",
        }
    }
}

/// Envelope wrapping every [`NodeMessage`] on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Wire protocol version; currently always [`WIRE_VERSION`].
    pub v: String,
    /// Sender-assigned logical timestamp (monotonic per sender).
    pub ts: u64,
    /// The carried message.
    pub msg: NodeMessage,
}

impl Envelope {
    /// Wrap `msg` in a v1 envelope stamped with `ts`.
    pub fn new(msg: NodeMessage, ts: u64) -> Self {
        Self {
            v: WIRE_VERSION.to_string(),
            ts,
            msg,
        }
    }
}

/// Transport-level carrier: an opaque topic plus an opaque payload.
/// The transport never interprets `payload`; it exists purely as a
/// best-effort broadcast/unicast primitive (see the `Transport` contract).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportMessage {
    /// Topic name (e.g. [`NODE_TOPIC`]), used for demultiplexing on receipt.
    pub topic: String,
    /// Framed bytes, produced by [`wire::encode_frame`].
    pub payload: Vec<u8>,
}

/// Kind of peer membership transition reported by the transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PeerEventKind {
    /// A peer joined the mesh and is now reachable.
    PeerConnected,
    /// A peer left the mesh (gracefully or not).
    PeerDisconnected,
}

/// Membership change notification delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerEvent {
    /// Which transition occurred.
    pub kind: PeerEventKind,
    /// The peer the event concerns.
    pub peer_id: PeerId,
    /// Optional human-readable reason (e.g. "timeout", "left").
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_message_type_tags_match_wire_names() {
        let propose = NodeMessage::ActionPropose {
            room_id: "R".into(),
            peer_id: "A".into(),
            tick: 1,
            seq: 0,
            payload: serde_json::json!({"a": 1}),
        };
        assert_eq!(propose.type_tag(), "ACTION_PROPOSE");
        assert_eq!(propose.room_id(), "R");

        let json = serde_json::to_value(&propose).unwrap();
        assert_eq!(json["type"], "ACTION_PROPOSE");
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let msg = NodeMessage::ActionSeal {
            room_id: "R".into(),
            peer_id: "B".into(),
            tick: 4,
            last_seq: -1,
        };
        let env = Envelope::new(msg.clone(), 42);
        let bytes = serde_json::to_vec(&env).unwrap();
        let decoded: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.v, WIRE_VERSION);
        assert_eq!(decoded.ts, 42);
        assert_eq!(decoded.msg, msg);
    }
}
