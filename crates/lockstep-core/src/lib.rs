// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Hostless lockstep ordering core.
//!
//! A [`LockstepOrdering`] engine turns a stream of per-peer action
//! proposals into a deterministic, gap-free sequence of [`Commit`]s under a
//! tick-barrier protocol, with no server and no peer holding special
//! authority. [`NodeRuntime`] wires that engine to an [`ActionLog`], an
//! embedding application's [`Rule`], and a [`Transport`], and is the thing a
//! binary actually drives.
//!
//! ```text
//! Transport -> NodeRuntime -> LockstepOrdering (pure)
//!                           -> Engine<R: Rule>  (pure)
//!                           -> ActionLog        (durable)
//! ```
//!
//! Everything reachable from [`LockstepOrdering`] and [`Engine`] is a pure
//! function of its inputs; the only places this crate touches the outside
//! world are the [`Transport`] boundary and the [`ActionLog`] backing store.

pub mod engine;
pub mod log;
pub mod meta;
pub mod node;
pub mod ordering;
pub mod room;
pub mod rule;
pub mod systems;
pub mod time;
pub mod transport;

pub use engine::Engine;
pub use log::{ActionLog, ActionLogError, MemoryActionLog, SledActionLog};
pub use meta::PeerMeta;
pub use node::{NodeError, NodeEvent, NodeRuntime};
pub use ordering::{LockstepOrdering, Outbound, OrderingOutput};
pub use room::{RoomConfig, RoomConfigError};
pub use rule::{ActionMeta, Rule};
pub use systems::{is_due, Schedule, Scheduler, System};
pub use time::TickClock;
pub use transport::{Transport, TransportError};
