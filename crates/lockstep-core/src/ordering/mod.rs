// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The lockstep ordering engine: a tick-based barrier protocol that
//! deterministically produces a gap-free sequence of action commits.
//!
//! This is a pure state machine. It never touches a clock, a socket, or a
//! log itself; callers drive it with injected wall time and hand the
//! [`Outbound`] messages it produces to whatever transport they have. That
//! split is what makes [`LockstepOrdering::tick`] (and every other entry
//! point here) deterministic and trivially testable without `tokio`.

pub mod buffer;

use crate::meta::PeerMeta;
use crate::room::RoomConfig;
use crate::time::TickClock;
use buffer::TickBuffer;
use lockstep_proto::{Commit, Height, NodeMessage, PeerEvent, PeerEventKind, PeerId, Seq, Tick};
use std::collections::{BTreeMap, BTreeSet};

/// Milliseconds a newly connected peer is given to settle before the
/// engine sends it a `SYNC_CLOCK` hint.
const PEER_SETTLE_DELAY_MS: i64 = 100;

/// A message this engine wants delivered, and to whom.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Send to every reachable peer (`Transport::broadcast`).
    Broadcast(NodeMessage),
    /// Send to exactly one peer (`Transport::send`).
    Unicast(PeerId, NodeMessage),
}

/// Everything a single call into the engine produced: messages to relay,
/// and any ticks that just became [`Commit`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderingOutput {
    /// Messages the caller should hand to its transport, in emission order.
    pub outbound: Vec<Outbound>,
    /// Newly committed ticks, in increasing `orderingTick`/`height` order.
    pub commits: Vec<Commit>,
}

impl OrderingOutput {
    fn empty() -> Self {
        Self::default()
    }
}

/// The ordering engine for a single room, as seen by one peer.
///
/// Every peer running this type with the same [`RoomConfig`] and an
/// identical stream of `ACTION_PROPOSE`/`ACTION_SEAL` deliveries (in any
/// interleaving that preserves per-sender order) emits byte-identical
/// commits: the per-tick sort in [`buffer::TickBuffer::ordered_actions_for`]
/// is the single source of that determinism.
pub struct LockstepOrdering {
    config: RoomConfig,
    clock: TickClock,
    self_id: PeerId,
    started: bool,
    /// `-1` until the first [`Self::tick`] call.
    current_tick: Tick,
    /// `-1` until the first commit is emitted.
    committed_tick: Tick,
    height_counter: Height,
    buffers: BTreeMap<Tick, TickBuffer>,
    peers: BTreeMap<PeerId, PeerMeta>,
    /// Next `seq` to assign for a local submission targeting a given tick.
    local_seq_counters: BTreeMap<Tick, Seq>,
    /// Peers awaiting a settle-delayed `SYNC_CLOCK`, with their due wall time.
    pending_syncs: Vec<(PeerId, i64)>,
}

impl LockstepOrdering {
    /// Build a fresh engine for `self_id` in the room described by `config`.
    /// The local peer is always eligible, starting at tick 0.
    pub fn new(self_id: PeerId, config: RoomConfig) -> Self {
        let clock = TickClock::new(&config);
        let mut peers = BTreeMap::new();
        peers.insert(self_id.clone(), PeerMeta::starting_at(0));
        Self {
            config,
            clock,
            self_id,
            started: false,
            current_tick: -1,
            committed_tick: -1,
            height_counter: 0,
            buffers: BTreeMap::new(),
            peers,
            local_seq_counters: BTreeMap::new(),
            pending_syncs: Vec::new(),
        }
    }

    /// Idempotent lifecycle start. Returns whether this call transitioned
    /// the engine from stopped to started.
    pub fn start(&mut self) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        true
    }

    /// Idempotent lifecycle stop.
    pub fn stop(&mut self) -> bool {
        if !self.started {
            return false;
        }
        self.started = false;
        true
    }

    /// The highest tick the local clock has reached (`-1` if not started).
    pub fn get_tick(&self) -> Tick {
        self.current_tick
    }

    /// The highest tick committed so far (`-1` if nothing has committed).
    pub fn get_committed_tick(&self) -> Tick {
        self.committed_tick
    }

    /// Current membership, in lexicographic order.
    pub fn get_peers(&self) -> Vec<&PeerId> {
        self.peers.keys().collect()
    }

    /// Buffer a local action and return the `ACTION_PROPOSE` to broadcast,
    /// or `None` if its input-delay horizon has already committed (I4).
    pub fn on_local_action(&mut self, payload: serde_json::Value, now_ms: i64) -> Option<NodeMessage> {
        let now_tick = self.clock.tick_for(now_ms);
        let target_tick = now_tick + self.config.input_delay_ticks;
        if target_tick <= self.committed_tick {
            tracing::warn!(
                target_tick,
                committed_tick = self.committed_tick,
                "dropping local action past its input-delay horizon"
            );
            return None;
        }
        let seq = self.next_local_seq(target_tick);
        let action = lockstep_proto::SignedAction {
            peer_id: self.self_id.clone(),
            payload: payload.clone(),
            seq,
        };
        self.buffers
            .entry(target_tick)
            .or_default()
            .record_proposal(self.self_id.clone(), seq, action);
        Some(NodeMessage::ActionPropose {
            room_id: self.config.room_id.clone(),
            peer_id: self.self_id.clone(),
            tick: target_tick,
            seq,
            payload,
        })
    }

    fn next_local_seq(&mut self, tick: Tick) -> Seq {
        let counter = self.local_seq_counters.entry(tick).or_insert(0);
        let seq = *counter;
        *counter += 1;
        seq
    }

    /// Handle an inbound protocol message. `from` is the transport-level
    /// authenticated sender, used as the spoofing guard against the
    /// envelope's own `peer_id` field.
    pub fn on_message(&mut self, from: PeerId, msg: NodeMessage, now_ms: i64) -> OrderingOutput {
        if msg.room_id() != self.config.room_id {
            return OrderingOutput::empty();
        }
        match msg {
            NodeMessage::ActionPropose {
                peer_id,
                tick,
                seq,
                payload,
                ..
            } => self.handle_propose(from, peer_id, tick, seq, payload),
            NodeMessage::ActionSeal {
                peer_id,
                tick,
                last_seq,
                ..
            } => self.handle_seal(from, peer_id, tick, last_seq),
            NodeMessage::ActionCommit { tick, height, .. } => {
                // Advisory only (§9 open question): logged, never compared
                // against the locally computed commit.
                tracing::debug!(tick, height, "received advisory ACTION_COMMIT gossip");
                OrderingOutput::empty()
            }
            NodeMessage::SyncClock { peer_id, tick, .. } => self.handle_sync_clock(from, peer_id, tick, now_ms),
        }
    }

    fn handle_propose(
        &mut self,
        from: PeerId,
        peer_id: PeerId,
        tick: Tick,
        seq: Seq,
        payload: serde_json::Value,
    ) -> OrderingOutput {
        if peer_id != from {
            tracing::warn!(%peer_id, %from, "dropping ACTION_PROPOSE with spoofed sender");
            return OrderingOutput::empty();
        }
        if tick <= self.committed_tick {
            tracing::debug!(tick, committed_tick = self.committed_tick, "dropping late ACTION_PROPOSE");
            return OrderingOutput::empty();
        }
        let action = lockstep_proto::SignedAction {
            peer_id: peer_id.clone(),
            payload,
            seq,
        };
        self.buffers.entry(tick).or_default().record_proposal(peer_id, seq, action);
        OrderingOutput {
            outbound: Vec::new(),
            commits: self.attempt_commits(),
        }
    }

    fn handle_seal(&mut self, from: PeerId, peer_id: PeerId, tick: Tick, last_seq: Seq) -> OrderingOutput {
        if peer_id != from {
            tracing::warn!(%peer_id, %from, "dropping ACTION_SEAL with spoofed sender");
            return OrderingOutput::empty();
        }
        if tick <= self.committed_tick {
            tracing::debug!(tick, committed_tick = self.committed_tick, "dropping late ACTION_SEAL");
            return OrderingOutput::empty();
        }
        self.buffers.entry(tick).or_default().record_seal(peer_id.clone(), last_seq);
        if let Some(meta) = self.peers.get_mut(&peer_id) {
            meta.record_seal(tick, last_seq);
        }
        OrderingOutput {
            outbound: Vec::new(),
            commits: self.attempt_commits(),
        }
    }

    fn handle_sync_clock(&mut self, from: PeerId, peer_id: PeerId, remote_tick: Tick, now_ms: i64) -> OrderingOutput {
        if peer_id != from {
            tracing::warn!(%peer_id, %from, "dropping SYNC_CLOCK with spoofed sender");
            return OrderingOutput::empty();
        }
        if remote_tick <= self.current_tick {
            return OrderingOutput {
                outbound: Vec::new(),
                commits: self.attempt_commits(),
            };
        }
        tracing::info!(remote_tick, local_tick = self.current_tick, "clock skew: warping forward");
        self.clock = TickClock::new(&RoomConfig {
            t0_ms: now_ms - remote_tick * self.config.tick_ms,
            ..self.config.clone()
        });
        self.current_tick = remote_tick;
        let horizon = remote_tick - 1 + self.config.input_delay_ticks;
        let mut outbound = Vec::new();
        for t in 0..=horizon {
            self.seal_self_for_tick(t, &mut outbound);
        }
        let floor = self.current_tick + self.config.input_delay_ticks;
        for meta in self.peers.values_mut() {
            meta.raise_first_eligible_tick(floor);
        }
        OrderingOutput {
            outbound,
            commits: self.attempt_commits(),
        }
    }

    /// Advance the local clock to `now_ms`, sealing every tick whose
    /// horizon the clock just crossed, then attempt head-of-line commits.
    ///
    /// The very first call (`currentTick` still `-1`) jumps directly to
    /// `tickAt(nowMs)` per §4.4 rather than walking the timeline from tick
    /// 0: a node that starts well after `t0Ms` (the common case — `t0Ms` is
    /// a room-wide epoch, not this peer's join time) would otherwise have
    /// to seal and buffer every intervening tick one at a time, which is
    /// unbounded in the gap between `t0Ms` and first call. `committedTick`
    /// is raised to `horizon - 1` in the same step so those skipped ticks
    /// are never mistaken for commitable: they're treated as already
    /// closed, not as a backlog to drain.
    pub fn tick(&mut self, now_ms: i64) -> OrderingOutput {
        let mut outbound = Vec::new();
        let observed_tick = self.clock.tick_for(now_ms);
        if self.current_tick == -1 {
            self.current_tick = observed_tick;
            let horizon = self.current_tick - 1 + self.config.input_delay_ticks;
            self.seal_self_for_tick(horizon, &mut outbound);
            let floor = horizon - 1;
            if floor > self.committed_tick {
                self.committed_tick = floor;
            }
        } else {
            let mut t = self.current_tick + 1;
            while t <= observed_tick {
                self.current_tick = t;
                let horizon = t - 1 + self.config.input_delay_ticks;
                self.seal_self_for_tick(horizon, &mut outbound);
                t += 1;
            }
        }
        self.flush_pending_syncs(now_ms, &mut outbound);
        OrderingOutput {
            outbound,
            commits: self.attempt_commits(),
        }
    }

    fn seal_self_for_tick(&mut self, tick: Tick, outbound: &mut Vec<Outbound>) {
        if tick < 0 {
            return;
        }
        if self.peers.get(&self.self_id).is_some_and(|m| m.has_sealed(tick)) {
            return;
        }
        let last_seq = self.local_seq_counters.get(&tick).map_or(-1, |&next| next - 1);
        self.buffers
            .entry(tick)
            .or_default()
            .record_seal(self.self_id.clone(), last_seq);
        self.peers
            .entry(self.self_id.clone())
            .or_insert_with(|| PeerMeta::starting_at(0))
            .record_seal(tick, last_seq);
        outbound.push(Outbound::Broadcast(NodeMessage::ActionSeal {
            room_id: self.config.room_id.clone(),
            peer_id: self.self_id.clone(),
            tick,
            last_seq,
        }));
    }

    fn flush_pending_syncs(&mut self, now_ms: i64, outbound: &mut Vec<Outbound>) {
        let (due, pending): (Vec<_>, Vec<_>) = self
            .pending_syncs
            .drain(..)
            .partition(|(_, due_ms)| now_ms >= *due_ms);
        self.pending_syncs = pending;
        for (peer_id, _) in due {
            outbound.push(Outbound::Unicast(
                peer_id,
                NodeMessage::SyncClock {
                    room_id: self.config.room_id.clone(),
                    peer_id: self.self_id.clone(),
                    tick: self.current_tick,
                },
            ));
        }
    }

    fn eligible_peers_for(&self, tick: Tick) -> BTreeSet<PeerId> {
        self.peers
            .iter()
            .filter(|(_, meta)| meta.first_eligible_tick <= tick)
            .map(|(peer_id, _)| peer_id.clone())
            .collect()
    }

    /// Commit every tick in `(committedTick, ...]` whose barrier is
    /// currently satisfied, stopping at the first that isn't (head-of-line).
    fn attempt_commits(&mut self) -> Vec<Commit> {
        let mut commits = Vec::new();
        loop {
            let next = self.committed_tick + 1;
            let eligible = self.eligible_peers_for(next);
            let committable = self
                .buffers
                .get(&next)
                .is_some_and(|buf| eligible.iter().all(|p| buf.is_peer_complete(p)));
            if !committable {
                break;
            }
            let buf = self.buffers.remove(&next).unwrap_or_default();
            let actions = buf.ordered_actions_for(&eligible);
            self.height_counter += 1;
            self.committed_tick = next;
            commits.push(Commit {
                height: self.height_counter,
                ordering_tick: next,
                actions,
            });
        }
        commits
    }

    /// Handle a transport-reported membership transition.
    pub fn on_peer_event(&mut self, event: PeerEvent, now_ms: i64) -> OrderingOutput {
        match event.kind {
            PeerEventKind::PeerConnected => self.peer_connected(event.peer_id, now_ms),
            PeerEventKind::PeerDisconnected => self.peer_disconnected(&event.peer_id),
        }
    }

    fn peer_connected(&mut self, peer_id: PeerId, now_ms: i64) -> OrderingOutput {
        // A peer connecting before the engine has ticked at all is a
        // founding room member, eligible from genesis like the local peer.
        // One joining mid-room is pushed `inputDelayTicks` past the tick
        // the engine has already reached, so it can never be on the hook
        // for a barrier whose window has already passed.
        let first_eligible_tick = if self.current_tick == -1 {
            0
        } else {
            self.current_tick + self.config.input_delay_ticks
        };
        self.peers.insert(peer_id.clone(), PeerMeta::starting_at(first_eligible_tick));
        self.pending_syncs.push((peer_id, now_ms + PEER_SETTLE_DELAY_MS));
        OrderingOutput::empty()
    }

    fn peer_disconnected(&mut self, peer_id: &PeerId) -> OrderingOutput {
        self.peers.remove(peer_id);
        self.pending_syncs.retain(|(p, _)| p != peer_id);
        OrderingOutput {
            outbound: Vec::new(),
            commits: self.attempt_commits(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(input_delay: Tick) -> RoomConfig {
        RoomConfig {
            t0_ms: 0,
            tick_ms: 100,
            input_delay_ticks: input_delay,
            room_id: "R".into(),
        }
    }

    fn propose(peer_id: &str, payload: serde_json::Value, tick: Tick, seq: Seq) -> NodeMessage {
        NodeMessage::ActionPropose {
            room_id: "R".into(),
            peer_id: peer_id.into(),
            tick,
            seq,
            payload,
        }
    }

    fn seal(peer_id: &str, tick: Tick, last_seq: Seq) -> NodeMessage {
        NodeMessage::ActionSeal {
            room_id: "R".into(),
            peer_id: peer_id.into(),
            tick,
            last_seq,
        }
    }

    /// S1 — two peers, one tick, one action each.
    #[test]
    fn s1_two_peers_one_action_each_commit_sorted_by_peer() {
        let mut a = LockstepOrdering::new("A".into(), cfg(1));
        a.start();
        a.peer_connected("B".into(), 0);
        // Bootstrap at tick 0 itself (the room has barely started), so the
        // direct `tickAt(nowMs)` jump on the first call lands on tick 0
        // rather than skipping past it.
        a.tick(0);
        // B is a founding member too: its own engine self-seals tick 0
        // (no actions) just as A's will, once A reaches it.
        a.on_message("B".into(), seal("B", 0, -1), 10);

        let propose_a = a.on_local_action(serde_json::json!({"a": 1}), 50).unwrap();
        assert_eq!(a.on_message("B".into(), propose("B", serde_json::json!({"b": 2}), 1, 0), 60).commits.len(), 0);
        let _ = propose_a; // A already buffered its own proposal directly.

        // B seals tick 1 (no further actions), then A's own clock reaches the horizon.
        let seal_out = a.on_message("B".into(), seal("B", 1, 0), 150);
        assert!(seal_out.commits.is_empty(), "A hasn't sealed its own tick yet");

        // A's second `tick()` call walks ticks 1..=2, sealing each as it
        // goes. Tick 0 (no actions from either peer) commits empty ahead of
        // the interesting one.
        let tick_out = a.tick(200);
        assert_eq!(tick_out.commits.len(), 2);
        assert_eq!(tick_out.commits[0].ordering_tick, 0);
        assert!(tick_out.commits[0].actions.is_empty());

        let commit = &tick_out.commits[1];
        assert_eq!(commit.ordering_tick, 1);
        let ids: Vec<_> = commit.actions.iter().map(|act| act.peer_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    /// S2 — late join: a peer connecting mid-room becomes eligible only
    /// `inputDelayTicks` ticks out from its connect tick.
    #[test]
    fn s2_late_join_sets_first_eligible_tick_ahead_of_connect() {
        let mut a = LockstepOrdering::new("A".into(), cfg(2));
        a.start();
        a.tick(0); // bootstrap: current_tick = 0

        for now_ms in (100..=1_000).step_by(100) {
            let _ = a.tick(now_ms);
        }
        assert_eq!(a.get_tick(), 10);

        a.peer_connected("B".into(), 1_000);
        assert_eq!(a.peers.get(&"B".to_string()).unwrap().first_eligible_tick, 12);
    }

    /// S3 — clock warp lifts current tick and every peer's eligibility floor.
    #[test]
    fn s3_sync_clock_warps_forward_and_raises_eligibility() {
        let mut a = LockstepOrdering::new("A".into(), cfg(1));
        a.start();
        a.tick(500); // current_tick = 5
        assert_eq!(a.get_tick(), 5);
        a.peer_connected("C".into(), 500);

        let out = a.on_message("B".into(), NodeMessage::SyncClock { room_id: "R".into(), peer_id: "B".into(), tick: 100 }, 10_000);
        assert_eq!(a.get_tick(), 100);
        assert!(a.peers.get(&"C".to_string()).unwrap().first_eligible_tick >= 101);
        // Ticks 0..=5 were already sealed before the warp; the warp's
        // catch-up loop only broadcasts fresh seals for 6..=100.
        assert!(out.outbound.iter().any(|o| matches!(o, Outbound::Broadcast(NodeMessage::ActionSeal { tick: 6, .. }))));
    }

    /// S4 — disconnecting the blocking peer unblocks a stalled tick.
    #[test]
    fn s4_disconnect_unblocks_stalled_commit() {
        let mut a = LockstepOrdering::new("A".into(), cfg(1));
        a.start();
        a.peer_connected("B".into(), 0);
        a.peer_connected("C".into(), 0);

        a.buffers.entry(0).or_default().record_seal("A".into(), -1);
        a.buffers.entry(0).or_default().record_seal("B".into(), -1);
        // C never seals tick 0.
        assert!(a.attempt_commits().is_empty());

        let out = a.peer_disconnected(&"C".to_string());
        assert_eq!(out.commits.len(), 1);
        assert_eq!(out.commits[0].ordering_tick, 0);
    }

    #[test]
    fn duplicate_propose_and_seal_are_idempotent() {
        let mut a = LockstepOrdering::new("A".into(), cfg(1));
        a.start();
        a.on_message("B".into(), propose("B", serde_json::json!({"x": 1}), 5, 0), 0);
        a.on_message("B".into(), propose("B", serde_json::json!({"x": 1}), 5, 0), 0);
        assert_eq!(a.buffers.get(&5).unwrap().ordered_actions().len(), 0); // not sealed yet
        a.on_message("B".into(), seal("B", 5, 0), 0);
        a.on_message("B".into(), seal("B", 5, 0), 0);
        assert_eq!(a.buffers.get(&5).unwrap().ordered_actions().len(), 1);
    }

    #[test]
    fn spoofed_sender_is_dropped() {
        let mut a = LockstepOrdering::new("A".into(), cfg(1));
        a.start();
        let out = a.on_message("Mallory".into(), propose("B", serde_json::json!({}), 5, 0), 0);
        assert!(out.commits.is_empty());
        assert!(a.buffers.get(&5).is_none());
    }

    #[test]
    fn late_proposal_past_committed_tick_is_dropped() {
        let mut a = LockstepOrdering::new("A".into(), cfg(1));
        a.start();
        a.committed_tick = 10;
        let out = a.on_message("B".into(), propose("B", serde_json::json!({}), 3, 0), 0);
        assert!(out.commits.is_empty());
        assert!(a.buffers.get(&3).is_none());
    }

    #[test]
    fn action_past_input_horizon_is_silently_dropped() {
        let mut a = LockstepOrdering::new("A".into(), cfg(1));
        a.start();
        a.committed_tick = 10;
        assert!(a.on_local_action(serde_json::json!({}), 0).is_none());
    }

    #[test]
    fn solo_peer_first_tick_call_bootstraps_directly_to_its_own_horizon() {
        // With only "A" in the room, the very first `tick()` call jumps
        // straight to `tickAt(nowMs)` per §4.4: ticks 0 and 1, which its
        // own clock has already passed by the time it first ticks, are
        // treated as already closed rather than walked and committed one
        // at a time.
        let mut a = LockstepOrdering::new("A".into(), cfg(3));
        a.start();
        let out = a.tick(250);
        assert_eq!(a.get_tick(), 2);
        assert_eq!(a.get_committed_tick(), 4);
        assert_eq!(out.commits.len(), 1);
        assert_eq!(out.commits[0].ordering_tick, 4);
        assert!(out.commits[0].actions.is_empty());
    }

    /// Regression: the first `tick()` call must bootstrap in O(1), not by
    /// walking every tick between `t0Ms` and `nowMs`. A room-wide epoch
    /// starting well before a given peer's process comes up is the normal
    /// case, not an edge case — this used to hang/OOM on the very first
    /// call for any realistic wall-clock gap.
    #[test]
    fn first_tick_call_does_not_walk_the_intervening_timeline() {
        let mut a = LockstepOrdering::new("A".into(), cfg(1));
        a.start();
        // ~11.5 days at a 100ms tick: far enough past `t0Ms` that a
        // per-tick walk would never return in a test, let alone in a hub
        // process that happens to start a while after the room's epoch.
        let out = a.tick(100_000_000_000);
        assert_eq!(a.get_tick(), 1_000_000_000);
        assert_eq!(a.buffers.len(), 1, "bootstrap should only ever touch its own horizon tick");
        assert_eq!(out.outbound.len(), 1);
        assert_eq!(out.commits.len(), 1);
    }
}
