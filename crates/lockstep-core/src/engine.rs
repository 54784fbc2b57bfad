// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The engine facade: composes a [`Rule`] with its systems and schedulers
//! into the one thing a node runtime actually drives.

use crate::rule::{ActionMeta, Rule};
use crate::systems::{is_due, Scheduler, System};
use lockstep_proto::{Height, Tick};

/// The synthetic author attached to scheduler-triggered state transitions,
/// which have no submitting peer.
const SCHEDULER_AUTHOR: &str = "$scheduler";

/// Composes a rule with its systems and schedulers. One `Engine` is built
/// once per room and driven by the node runtime for the room's lifetime.
pub struct Engine<R: Rule> {
    rule: R,
    systems: Vec<Box<dyn System<R> + Send + Sync>>,
    schedulers: Vec<Box<dyn Scheduler<R> + Send + Sync>>,
    last_scheduler_tick: Tick,
}

impl<R: Rule> Engine<R> {
    /// Compose `rule` with `systems` (run in registration order after every
    /// `apply`) and `schedulers` (run on their own cadence during catch-up).
    pub fn new(rule: R, systems: Vec<Box<dyn System<R> + Send + Sync>>, schedulers: Vec<Box<dyn Scheduler<R> + Send + Sync>>) -> Self {
        Self {
            rule,
            systems,
            schedulers,
            last_scheduler_tick: -1,
        }
    }

    /// The state a fresh room starts in.
    pub fn initial_state(&self) -> R::State {
        self.rule.initial_state()
    }

    /// Delegates to [`Rule::is_legal`].
    pub fn is_legal(&self, state: &R::State, action: &R::Action, meta: &ActionMeta) -> Result<(), String> {
        self.rule.is_legal(state, action, meta)
    }

    /// Delegates to [`Rule::decode_action`].
    pub fn decode_action(&self, payload: &serde_json::Value) -> Result<R::Action, String> {
        self.rule.decode_action(payload)
    }

    /// Delegates to [`Rule::observe`].
    pub fn observe(&self, state: &R::State, viewer_id: &lockstep_proto::PeerId) -> R::View {
        self.rule.observe(state, viewer_id)
    }

    /// Validate then apply, running every registered system in registration
    /// order afterward. An illegal action leaves `state` unchanged rather
    /// than erroring: per §4.7, `reduce` never throws.
    pub fn reduce(&self, state: &R::State, action: &R::Action, meta: &ActionMeta) -> R::State {
        if let Err(reason) = self.rule.is_legal(state, action, meta) {
            tracing::debug!(%reason, from = %meta.from, tick = meta.ordering_tick, "rule rejected action");
            return state.clone();
        }
        let mut next = self.rule.apply(state, action, meta);
        for system in &self.systems {
            next = system.update(&next, meta);
        }
        next
    }

    /// Run every scheduler due for any tick in `(last_scheduler_tick, committed_tick]`,
    /// in ascending tick order, schedulers within a tick ordered lexicographically
    /// by [`Scheduler::id`]. Advances `last_scheduler_tick` to `committed_tick`
    /// unconditionally, so no tick is ever visited twice even if this is
    /// called again with the same `committed_tick` (a no-op) or skips a run
    /// of ticks in one burst (the loop still visits each of them).
    pub fn catch_up_schedulers(&mut self, mut state: R::State, committed_tick: Tick, height: Option<Height>) -> R::State {
        if committed_tick <= self.last_scheduler_tick {
            return state;
        }
        let mut ordered: Vec<&Box<dyn Scheduler<R> + Send + Sync>> = self.schedulers.iter().collect();
        ordered.sort_by(|a, b| a.id().cmp(b.id()));

        let mut tick = self.last_scheduler_tick + 1;
        while tick <= committed_tick {
            let meta = ActionMeta {
                from: SCHEDULER_AUTHOR.into(),
                ordering_tick: tick,
                height,
            };
            for scheduler in &ordered {
                let schedule = scheduler.schedule(&state);
                if is_due(&schedule, &state, &meta) {
                    state = scheduler.apply(&state, &meta);
                }
            }
            tick += 1;
        }
        self.last_scheduler_tick = committed_tick;
        state
    }
}
