// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-process loopback transport: every node joined to the same
//! [`LoopbackMesh`] can reach every other, with no sockets involved. Used by
//! the hub binary for local multi-node testing and as a reference
//! `Transport` implementation for embedders.

use lockstep_core::{Transport, TransportError};
use lockstep_proto::{wire, NodeMessage, PeerEvent, PeerEventKind, PeerId, TransportMessage};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

type RawInbox = mpsc::UnboundedSender<(PeerId, TransportMessage)>;

/// Shared registry of every peer currently joined to a mesh.
#[derive(Default)]
struct Registry {
    transports: BTreeMap<PeerId, RawInbox>,
    peer_events: BTreeMap<PeerId, mpsc::UnboundedSender<PeerEvent>>,
}

/// A loopback mesh: a shared, in-process registry that [`LoopbackTransport`]
/// handles broadcast and unicast through.
#[derive(Clone, Default)]
pub struct LoopbackMesh {
    registry: Arc<Mutex<Registry>>,
}

impl LoopbackMesh {
    /// An empty mesh with no peers joined yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `peer_id` to the mesh, returning its transport handle, a raw
    /// inbound-frame receiver to decode and feed to a node runtime, and a
    /// peer-event receiver reporting every other peer's connect/disconnect.
    ///
    /// Every peer already on the mesh is notified of this join; the joining
    /// peer is notified of every peer already present.
    pub async fn join(
        &self,
        peer_id: PeerId,
    ) -> (
        LoopbackTransport,
        mpsc::UnboundedReceiver<(PeerId, TransportMessage)>,
        mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut registry = self.registry.lock().await;
        for existing in registry.transports.keys() {
            let _ = event_tx.send(PeerEvent {
                kind: PeerEventKind::PeerConnected,
                peer_id: existing.clone(),
                reason: None,
            });
        }
        for other_events in registry.peer_events.values() {
            let _ = other_events.send(PeerEvent {
                kind: PeerEventKind::PeerConnected,
                peer_id: peer_id.clone(),
                reason: None,
            });
        }
        registry.transports.insert(peer_id.clone(), inbox_tx);
        registry.peer_events.insert(peer_id.clone(), event_tx);
        drop(registry);

        (
            LoopbackTransport {
                self_id: peer_id,
                registry: self.registry.clone(),
            },
            inbox_rx,
            event_rx,
        )
    }

    /// Remove `peer_id` from the mesh, notifying every remaining peer.
    pub async fn leave(&self, peer_id: &str, reason: Option<String>) {
        let mut registry = self.registry.lock().await;
        registry.transports.remove(peer_id);
        registry.peer_events.remove(peer_id);
        for events in registry.peer_events.values() {
            let _ = events.send(PeerEvent {
                kind: PeerEventKind::PeerDisconnected,
                peer_id: peer_id.to_string(),
                reason: reason.clone(),
            });
        }
    }
}

/// One peer's handle onto a [`LoopbackMesh`]. Implements [`Transport`] by
/// pushing `TransportMessage`s directly into the target peer's inbox
/// channel — no encoding beyond what [`wire`] already did upstream.
pub struct LoopbackTransport {
    self_id: PeerId,
    registry: Arc<Mutex<Registry>>,
}

impl Transport for LoopbackTransport {
    fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    async fn start(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn broadcast(&self, message: TransportMessage) -> Result<(), TransportError> {
        let registry = self.registry.lock().await;
        for (peer_id, inbox) in &registry.transports {
            if *peer_id == self.self_id {
                continue;
            }
            let _ = inbox.send((self.self_id.clone(), message.clone()));
        }
        Ok(())
    }

    async fn send(&self, to: PeerId, message: TransportMessage) -> Result<(), TransportError> {
        let registry = self.registry.lock().await;
        let inbox = registry.transports.get(&to).ok_or_else(|| TransportError::UnknownPeer(to.clone()))?;
        inbox
            .send((self.self_id.clone(), message))
            .map_err(|err| TransportError::Send(err.to_string()))
    }
}

/// Decode raw frames from `raw_rx` into [`NodeMessage`]s and forward them
/// to `decoded_tx`, until the mesh drops the sender side. Malformed frames
/// are logged and dropped rather than killing the loop.
pub async fn run_decode_loop(
    mut raw_rx: mpsc::UnboundedReceiver<(PeerId, TransportMessage)>,
    decoded_tx: mpsc::Sender<(PeerId, NodeMessage)>,
) {
    while let Some((from, frame)) = raw_rx.recv().await {
        match wire::decode_message(&frame.payload) {
            Ok((msg, _ts)) => {
                if decoded_tx.send((from, msg)).await.is_err() {
                    break;
                }
            }
            Err(err) => tracing::warn!(%err, %from, "dropping malformed loopback frame"),
        }
    }
}
