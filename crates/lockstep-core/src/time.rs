// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Maps wall-clock milliseconds to logical ordering ticks.

use crate::room::RoomConfig;
use lockstep_proto::Tick;

/// Stateless wall-clock-to-tick mapping derived from a [`RoomConfig`].
///
/// `TickClock` never reads the system clock itself; callers supply `now_ms`
/// explicitly so the ordering engine stays driven, not timer-owning (see the
/// engine's `tick` entry point).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickClock {
    t0_ms: i64,
    tick_ms: i64,
}

impl TickClock {
    /// Build a clock anchored at `config.t0_ms` with period `config.tick_ms`.
    pub fn new(config: &RoomConfig) -> Self {
        Self {
            t0_ms: config.t0_ms,
            tick_ms: config.tick_ms,
        }
    }

    /// The highest tick whose window has fully elapsed by `now_ms`.
    ///
    /// Returns `-1` if `now_ms` is still before `t0_ms`.
    pub fn tick_for(&self, now_ms: i64) -> Tick {
        let elapsed = now_ms - self.t0_ms;
        if elapsed < 0 {
            return -1;
        }
        elapsed / self.tick_ms
    }

    /// Wall-clock instant (ms) at which `tick` begins.
    pub fn start_of(&self, tick: Tick) -> i64 {
        self.t0_ms + tick * self.tick_ms
    }

    /// Wall-clock deadline (ms) at which `tick` closes — the start of the
    /// following tick.
    pub fn deadline_for(&self, tick: Tick) -> i64 {
        self.t0_ms + (tick + 1) * self.tick_ms
    }
}
