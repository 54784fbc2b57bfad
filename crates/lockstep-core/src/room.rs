// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Immutable per-session room configuration.

use lockstep_proto::{RoomId, Tick};
use serde::{Deserialize, Serialize};

/// Configuration shared by every peer in a room. Divergence between peers
/// (different `t0_ms`, `tick_ms`, or `input_delay_ticks`) is a fatal
/// configuration error; this crate does not attempt to reconcile it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Wall-clock epoch (ms) tick 0 is anchored to.
    pub t0_ms: i64,
    /// Duration of one ordering tick, in milliseconds.
    pub tick_ms: i64,
    /// Ticks of lag an author imposes between submission and target tick.
    pub input_delay_ticks: Tick,
    /// Logical room identifier, carried on every wire message.
    pub room_id: RoomId,
}

impl RoomConfig {
    /// Validate the invariants this type's fields must uphold:
    /// a positive tick duration and `input_delay_ticks >= 1`.
    pub fn validate(&self) -> Result<(), RoomConfigError> {
        if self.tick_ms <= 0 {
            return Err(RoomConfigError::NonPositiveTickMs(self.tick_ms));
        }
        if self.input_delay_ticks < 1 {
            return Err(RoomConfigError::InputDelayTooSmall(self.input_delay_ticks));
        }
        Ok(())
    }
}

/// Errors raised validating a [`RoomConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomConfigError {
    /// `tick_ms` must be strictly positive to divide wall time.
    #[error("tick_ms must be positive, got {0}")]
    NonPositiveTickMs(i64),
    /// `input_delay_ticks` must be at least 1: a delay of 0 would let a
    /// submission target a tick that may have already sealed.
    #[error("input_delay_ticks must be >= 1, got {0}")]
    InputDelayTooSmall(Tick),
}
