// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Systems run after every successful rule application; schedulers run on a
//! tick cadence independent of whether any action committed that tick.

use crate::rule::{ActionMeta, Rule};
use lockstep_proto::Tick;

/// A deterministic post-reduce pass over state, same determinism
/// constraints as [`Rule::apply`].
pub trait System<R: Rule> {
    /// Run this pass over `state`, returning the next state.
    fn update(&self, state: &R::State, meta: &ActionMeta) -> R::State;
}

/// When a [`Scheduler`] is due to run, expressed as a tagged union rather
/// than a class hierarchy.
pub enum Schedule<S> {
    /// Fires once per tick on the cadence `(tick - start_tick) % every_ticks == 0`.
    Every {
        /// Cadence, in ticks.
        every_ticks: Tick,
        /// The tick the cadence is anchored to.
        start_tick: Tick,
        /// When present and it returns `true`, suppresses an otherwise-due fire.
        except: Option<Box<dyn Fn(&S, &ActionMeta) -> bool>>,
    },
    /// Fires exactly once, at `at_tick`.
    Once {
        /// The single tick this schedule fires at.
        at_tick: Tick,
        /// When present and it returns `true`, suppresses the fire.
        except: Option<Box<dyn Fn(&S, &ActionMeta) -> bool>>,
    },
    /// Fires whenever an arbitrary predicate over state holds.
    Manual(Box<dyn Fn(&S, &ActionMeta) -> bool>),
}

/// Pure predicate: is `schedule` due at `meta.ordering_tick`, given `state`?
pub fn is_due<S>(schedule: &Schedule<S>, state: &S, meta: &ActionMeta) -> bool {
    match schedule {
        Schedule::Every {
            every_ticks,
            start_tick,
            except,
        } => {
            if *every_ticks <= 0 {
                return false;
            }
            let due = (meta.ordering_tick - start_tick).rem_euclid(*every_ticks) == 0 && meta.ordering_tick >= *start_tick;
            due && !except.as_ref().is_some_and(|f| f(state, meta))
        }
        Schedule::Once { at_tick, except } => meta.ordering_tick == *at_tick && !except.as_ref().is_some_and(|f| f(state, meta)),
        Schedule::Manual(predicate) => predicate(state, meta),
    }
}

/// A tick-gated job run during the catch-up loop after each commit.
///
/// `id` orders schedulers deterministically (lexicographic, stable) when
/// more than one is due for the same tick.
pub trait Scheduler<R: Rule> {
    /// Stable identifier, used to order same-tick schedulers lexicographically.
    fn id(&self) -> &str;
    /// The cadence this scheduler runs on, possibly depending on `state`.
    fn schedule(&self, state: &R::State) -> Schedule<R::State>;
    /// Run this scheduler's job, returning the next state.
    fn apply(&self, state: &R::State, meta: &ActionMeta) -> R::State;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(tick: Tick) -> ActionMeta {
        ActionMeta {
            from: "A".into(),
            ordering_tick: tick,
            height: None,
        }
    }

    #[test]
    fn every_fires_on_cadence_from_start_tick() {
        let schedule: Schedule<()> = Schedule::Every {
            every_ticks: 3,
            start_tick: 1,
            except: None,
        };
        assert!(!is_due(&schedule, &(), &meta(0)));
        assert!(is_due(&schedule, &(), &meta(1)));
        assert!(!is_due(&schedule, &(), &meta(2)));
        assert!(is_due(&schedule, &(), &meta(4)));
        assert!(is_due(&schedule, &(), &meta(7)));
    }

    #[test]
    fn once_fires_only_at_its_tick() {
        let schedule: Schedule<()> = Schedule::Once { at_tick: 5, except: None };
        assert!(!is_due(&schedule, &(), &meta(4)));
        assert!(is_due(&schedule, &(), &meta(5)));
        assert!(!is_due(&schedule, &(), &meta(6)));
    }

    #[test]
    fn except_predicate_suppresses_an_otherwise_due_schedule() {
        let schedule: Schedule<bool> = Schedule::Every {
            every_ticks: 1,
            start_tick: 0,
            except: Some(Box::new(|suppressed: &bool, _meta| *suppressed)),
        };
        assert!(is_due(&schedule, &false, &meta(3)));
        assert!(!is_due(&schedule, &true, &meta(3)));
    }

    #[test]
    fn manual_defers_entirely_to_predicate() {
        let schedule: Schedule<u32> = Schedule::Manual(Box::new(|state: &u32, _meta| *state > 10));
        assert!(!is_due(&schedule, &5, &meta(0)));
        assert!(is_due(&schedule, &11, &meta(0)));
    }
}
