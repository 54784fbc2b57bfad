// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The rule kernel: the pure validation and state-transition boundary every
//! embedding application plugs into the engine at.
//!
//! Everything here is deliberately inert. `Rule` implementations must not
//! read a clock, touch the filesystem, or draw from an unseeded RNG — the
//! entire determinism guarantee this crate offers rests on `apply` being a
//! referentially transparent function of `(state, action, meta)`.

use lockstep_proto::{Height, PeerId, Tick};

/// The provenance of an action being validated or applied, carried
/// alongside it through the rule and system pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMeta {
    /// The peer that authored the action.
    pub from: PeerId,
    /// The ordering tick the action committed at.
    pub ordering_tick: Tick,
    /// The log height of the commit the action arrived in, once known.
    /// `None` during optimistic (pre-commit) application.
    pub height: Option<Height>,
}

/// An embedding application's state machine, reduced to the two operations
/// the core needs: can this happen, and what happens next.
///
/// `State`, `Action`, and `View` are associated types rather than generic
/// parameters on every consumer (`Engine<R>`, `System<R>`, `Scheduler<R>`)
/// so that a whole reducer pipeline can be named with one type parameter.
pub trait Rule {
    /// The authoritative (and optimistic) state this rule reduces over.
    type State: Clone;
    /// The decoded action type `apply`/`is_legal` operate on.
    type Action;
    /// A viewer-scoped projection of `State`, returned by `observe`.
    type View;

    /// The state a fresh room starts in.
    fn initial_state(&self) -> Self::State;

    /// Cheap, side-effect-free validation. Returning `Err` causes the
    /// caller (`Engine::reduce`) to skip `apply` and leave state unchanged.
    fn is_legal(&self, state: &Self::State, action: &Self::Action, meta: &ActionMeta) -> Result<(), String>;

    /// Produce the next state. Must be referentially transparent: the same
    /// `(state, action, meta)` triple always yields the same result, on
    /// every peer, forever.
    fn apply(&self, state: &Self::State, action: &Self::Action, meta: &ActionMeta) -> Self::State;

    /// Decode a commit's raw JSON payload into `Self::Action`.
    fn decode_action(&self, payload: &serde_json::Value) -> Result<Self::Action, String>;

    /// Project `state` into whatever `viewer_id` is allowed to see (fog of
    /// war, private hands, and the like). Rules with nothing to hide can
    /// implement this as a cheap clone into `View`.
    fn observe(&self, state: &Self::State, viewer_id: &PeerId) -> Self::View;
}
