// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The transport boundary the node runtime is driven through.
//!
//! This crate ships no transport implementation of its own beyond what the
//! headless hub binary needs for its in-process mesh; real deployments wire
//! up WebRTC data channels, QUIC streams, or whatever signaling layer they
//! already have, behind this trait.

use lockstep_proto::{PeerId, TransportMessage};
use thiserror::Error;

/// Failures a transport implementation can report back to the node runtime.
/// The node logs and continues on every variant here: the transport owns
/// reconnection and retry, not the core.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A send or broadcast was attempted before `start` completed.
    #[error("transport is not started")]
    NotStarted,
    /// `send` named a peer the transport has no route to.
    #[error("peer {0} is not reachable")]
    UnknownPeer(PeerId),
    /// The underlying channel rejected or failed to deliver the message.
    #[error("send failed: {0}")]
    Send(String),
}

/// Best-effort, ordered-within-channel broadcast/unicast to named peers.
///
/// Native async-fn-in-trait, no `async-trait` wrapper: every method here is
/// fire-and-forget from the ordering engine's perspective, matching the
/// external contract's "future<void>" signatures.
pub trait Transport: Send + Sync {
    /// This node's own identifier, as the transport's peers see it.
    fn self_id(&self) -> &PeerId;

    /// Bring the transport up: connect, bind, or whatever its medium needs
    /// before `broadcast`/`send` can succeed.
    async fn start(&self) -> Result<(), TransportError>;

    /// Tear the transport down, releasing any held connections or sockets.
    async fn stop(&self) -> Result<(), TransportError>;

    /// Best-effort delivery to every other reachable peer.
    async fn broadcast(&self, message: TransportMessage) -> Result<(), TransportError>;

    /// Best-effort delivery to exactly one peer.
    async fn send(&self, to: PeerId, message: TransportMessage) -> Result<(), TransportError>;
}
