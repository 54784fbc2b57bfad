// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Durable, append-only, gap-free record of every [`Commit`] an ordering
//! engine has produced for a room.

mod sled_log;

pub use sled_log::SledActionLog;

use lockstep_proto::{Commit, Height};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised by an [`ActionLog`] implementation.
#[derive(Debug, Error)]
pub enum ActionLogError {
    /// `append` was called with a height that doesn't immediately follow
    /// the current tail (i.e. would leave a gap, or rewrite history).
    #[error("non-contiguous append: expected height {expected}, got {got}")]
    NonContiguousAppend {
        /// The height `append` required.
        expected: Height,
        /// The height it was actually called with.
        got: Height,
    },
    /// The durable backing store failed to read or write.
    #[error("action log store failure: {0}")]
    Store(String),
}

/// Append-only log of committed ticks, keyed by gap-free [`Height`].
///
/// Implementations must reject out-of-order or duplicate appends rather
/// than silently reordering or overwriting them; the ordering engine relies
/// on `append` to be the single point where height contiguity is enforced.
pub trait ActionLog {
    /// Append `commit`. `commit.height` must equal `self.len() + 1`.
    fn append(&mut self, commit: Commit) -> Result<(), ActionLogError>;

    /// Fetch the commit at `height`, if present.
    fn get(&self, height: Height) -> Result<Option<Commit>, ActionLogError>;

    /// Number of commits appended so far (the height of the last commit).
    fn len(&self) -> Result<Height, ActionLogError>;

    /// Whether the log is empty.
    fn is_empty(&self) -> Result<bool, ActionLogError> {
        Ok(self.len()? == 0)
    }

    /// Fetch commits in `[from_height, to_height]`, inclusive. Empty if the
    /// range falls entirely outside what's stored; never pads with gaps.
    fn get_range(&self, from_height: Height, to_height: Height) -> Result<Vec<Commit>, ActionLogError> {
        let mut out = Vec::new();
        let mut height = from_height;
        while height <= to_height {
            if let Some(commit) = self.get(height)? {
                out.push(commit);
            }
            height += 1;
        }
        Ok(out)
    }

    /// Drop every stored commit. Used by tests to reset a log between runs.
    fn clear(&mut self) -> Result<(), ActionLogError>;
}

/// In-memory [`ActionLog`], suitable for tests and for headless nodes that
/// don't need a durable replay history across restarts.
#[derive(Debug, Default)]
pub struct MemoryActionLog {
    commits: BTreeMap<Height, Commit>,
}

impl MemoryActionLog {
    /// An empty in-memory log.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActionLog for MemoryActionLog {
    fn append(&mut self, commit: Commit) -> Result<(), ActionLogError> {
        let expected = self.commits.len() as Height + 1;
        if commit.height != expected {
            return Err(ActionLogError::NonContiguousAppend {
                expected,
                got: commit.height,
            });
        }
        self.commits.insert(commit.height, commit);
        Ok(())
    }

    fn get(&self, height: Height) -> Result<Option<Commit>, ActionLogError> {
        Ok(self.commits.get(&height).cloned())
    }

    fn len(&self) -> Result<Height, ActionLogError> {
        Ok(self.commits.len() as Height)
    }

    fn clear(&mut self) -> Result<(), ActionLogError> {
        self.commits.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_proto::SignedAction;

    fn commit(height: Height) -> Commit {
        Commit {
            height,
            ordering_tick: height as i64 - 1,
            actions: vec![SignedAction {
                peer_id: "A".into(),
                payload: serde_json::json!({"n": height}),
                seq: 0,
            }],
        }
    }

    #[test]
    fn appends_sequentially_and_reads_back() {
        let mut log = MemoryActionLog::new();
        log.append(commit(1)).unwrap();
        log.append(commit(2)).unwrap();
        assert_eq!(log.len().unwrap(), 2);
        assert_eq!(log.get(1).unwrap(), Some(commit(1)));
        assert_eq!(log.get(2).unwrap(), Some(commit(2)));
        assert_eq!(log.get(3).unwrap(), None);
    }

    #[test]
    fn rejects_non_contiguous_append() {
        let mut log = MemoryActionLog::new();
        log.append(commit(1)).unwrap();
        let err = log.append(commit(3)).unwrap_err();
        assert!(matches!(
            err,
            ActionLogError::NonContiguousAppend {
                expected: 2,
                got: 3
            }
        ));
    }

    #[test]
    fn rejects_duplicate_append() {
        let mut log = MemoryActionLog::new();
        log.append(commit(1)).unwrap();
        let err = log.append(commit(1)).unwrap_err();
        assert!(matches!(
            err,
            ActionLogError::NonContiguousAppend {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn get_range_is_inclusive_and_empty_outside_stored_heights() {
        let mut log = MemoryActionLog::new();
        log.append(commit(1)).unwrap();
        log.append(commit(2)).unwrap();
        log.append(commit(3)).unwrap();
        assert_eq!(log.get_range(2, 3).unwrap(), vec![commit(2), commit(3)]);
        assert_eq!(log.get_range(5, 9).unwrap(), Vec::new());
    }

    #[test]
    fn clear_drops_everything() {
        let mut log = MemoryActionLog::new();
        log.append(commit(1)).unwrap();
        log.clear().unwrap();
        assert_eq!(log.len().unwrap(), 0);
        log.append(commit(1)).unwrap();
    }
}
