// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for lockstep hub tools (typed config only).
//! Keeps runtime adapters thin and storage-agnostic.

mod config;

pub use config::{ConfigError, ConfigService, ConfigStore};
