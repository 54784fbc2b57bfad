// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! A trivial [`Rule`] so the hub binary has something to reduce over.
//! Real embedders bring their own; this one exists to exercise the pipeline
//! end to end without depending on an actual game's reducer.

use lockstep_core::{ActionMeta, Rule};
use lockstep_proto::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A running total plus each peer's lifetime contribution to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyState {
    /// Sum of every committed delta.
    pub total: i64,
    /// Per-peer running sum of deltas they've contributed.
    pub contributions: BTreeMap<PeerId, i64>,
}

/// Reduces signed integer deltas into a [`TallyState`]. Zero deltas are
/// rejected as illegal, purely to give the hub something to log a rejection
/// for.
pub struct TallyRule;

impl Rule for TallyRule {
    type State = TallyState;
    type Action = i64;
    type View = TallyState;

    fn initial_state(&self) -> Self::State {
        TallyState::default()
    }

    fn is_legal(&self, _state: &Self::State, action: &Self::Action, _meta: &ActionMeta) -> Result<(), String> {
        if *action == 0 {
            Err("zero deltas are not meaningful contributions".to_string())
        } else {
            Ok(())
        }
    }

    fn apply(&self, state: &Self::State, action: &Self::Action, meta: &ActionMeta) -> Self::State {
        let mut next = state.clone();
        next.total += action;
        *next.contributions.entry(meta.from.clone()).or_insert(0) += action;
        next
    }

    fn decode_action(&self, payload: &serde_json::Value) -> Result<Self::Action, String> {
        payload
            .get("delta")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| "expected {\"delta\": <integer>}".to_string())
    }

    fn observe(&self, state: &Self::State, _viewer_id: &PeerId) -> Self::View {
        state.clone()
    }
}
