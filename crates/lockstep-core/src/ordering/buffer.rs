// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-tick accumulation of proposals and seals, prior to commit.

use lockstep_proto::{PeerId, Seq, SignedAction};
use std::collections::{BTreeMap, BTreeSet};

/// Everything received so far for a single ordering tick.
///
/// Keys are `BTreeMap`s deliberately: both peer identifiers and per-peer
/// sequence numbers need a stable total order for the commit-ordering rule,
/// and a sorted map gives it to us for free on iteration.
#[derive(Debug, Clone, Default)]
pub struct TickBuffer {
    proposals: BTreeMap<PeerId, BTreeMap<Seq, SignedAction>>,
    sealed: BTreeMap<PeerId, Seq>,
}

impl TickBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `action` from `peer_id` at `seq`, idempotently (a re-send of
    /// the same `(peer, seq)` overwrites rather than duplicates).
    pub fn record_proposal(&mut self, peer_id: PeerId, seq: Seq, action: SignedAction) {
        self.proposals.entry(peer_id).or_default().insert(seq, action);
    }

    /// Record that `peer_id` will send no more actions past `last_seq`.
    pub fn record_seal(&mut self, peer_id: PeerId, last_seq: Seq) {
        self.sealed.insert(peer_id, last_seq);
    }

    /// Whether `peer_id` has sealed this tick.
    pub fn has_sealed(&self, peer_id: &str) -> bool {
        self.sealed.contains_key(peer_id)
    }

    /// Whether `peer_id`'s proposals for this tick are complete: sealed,
    /// and every sequence number from `0` to its declared `last_seq` is
    /// present (a `last_seq` of `-1` means "complete with zero actions").
    pub fn is_peer_complete(&self, peer_id: &str) -> bool {
        let Some(&last_seq) = self.sealed.get(peer_id) else {
            return false;
        };
        if last_seq < 0 {
            return true;
        }
        let Some(actions) = self.proposals.get(peer_id) else {
            return false;
        };
        (0..=last_seq).all(|seq| actions.contains_key(&seq))
    }

    /// Emit this tick's actions in deterministic commit order: peers sorted
    /// lexicographically by id, each peer's actions sorted by `seq`.
    ///
    /// Callers must only invoke this once every required peer satisfies
    /// [`Self::is_peer_complete`]; it does not itself re-check completeness.
    pub fn ordered_actions(&self) -> Vec<SignedAction> {
        let all_sealed: BTreeSet<PeerId> = self.sealed.keys().cloned().collect();
        self.ordered_actions_for(&all_sealed)
    }

    /// Same as [`Self::ordered_actions`], but restricted to `eligible` peers.
    ///
    /// The ordering engine uses this at commit time so that a peer's seal
    /// for a tick it was never eligible for (a stray or racing message)
    /// cannot perturb the deterministic order every other peer computes.
    pub fn ordered_actions_for(&self, eligible: &BTreeSet<PeerId>) -> Vec<SignedAction> {
        let mut out = Vec::new();
        for peer_id in eligible {
            let Some(&last_seq) = self.sealed.get(peer_id) else {
                continue;
            };
            if last_seq < 0 {
                continue;
            }
            if let Some(actions) = self.proposals.get(peer_id) {
                for seq in 0..=last_seq {
                    if let Some(action) = actions.get(&seq) {
                        out.push(action.clone());
                    }
                }
            }
        }
        out
    }
}
