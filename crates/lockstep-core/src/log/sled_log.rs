// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Durable [`ActionLog`] backed by a `sled` tree, keyed by big-endian
//! [`Height`] so iteration order matches commit order.

use super::{ActionLog, ActionLogError};
use lockstep_proto::{Commit, Height};

/// Durable, crash-safe action log. Each commit is stored as a JSON blob
/// under its big-endian-encoded height; `sled` keeps the tree sorted, so
/// `len` only needs the last key rather than a full scan.
pub struct SledActionLog {
    tree: sled::Tree,
}

impl SledActionLog {
    /// Open (or create) an action log backed by `tree`, typically obtained
    /// via `sled::Db::open_tree`.
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    fn key_for(height: Height) -> [u8; 8] {
        height.to_be_bytes()
    }
}

impl ActionLog for SledActionLog {
    fn append(&mut self, commit: Commit) -> Result<(), ActionLogError> {
        let expected = self.len()? + 1;
        if commit.height != expected {
            return Err(ActionLogError::NonContiguousAppend {
                expected,
                got: commit.height,
            });
        }
        let bytes = serde_json::to_vec(&commit).map_err(|err| ActionLogError::Store(err.to_string()))?;
        self.tree
            .insert(Self::key_for(commit.height), bytes)
            .map_err(|err| ActionLogError::Store(err.to_string()))?;
        self.tree
            .flush()
            .map_err(|err| ActionLogError::Store(err.to_string()))?;
        Ok(())
    }

    fn get(&self, height: Height) -> Result<Option<Commit>, ActionLogError> {
        let raw = self
            .tree
            .get(Self::key_for(height))
            .map_err(|err| ActionLogError::Store(err.to_string()))?;
        raw.map(|bytes| {
            serde_json::from_slice(&bytes).map_err(|err| ActionLogError::Store(err.to_string()))
        })
        .transpose()
    }

    fn len(&self) -> Result<Height, ActionLogError> {
        let last = self
            .tree
            .last()
            .map_err(|err| ActionLogError::Store(err.to_string()))?;
        Ok(match last {
            Some((key, _)) => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&key);
                Height::from_be_bytes(buf)
            }
            None => 0,
        })
    }

    fn clear(&mut self) -> Result<(), ActionLogError> {
        self.tree.clear().map_err(|err| ActionLogError::Store(err.to_string()))?;
        self.tree.flush().map_err(|err| ActionLogError::Store(err.to_string()))?;
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

    fn open_scratch(dir: &tempfile::TempDir) -> SledActionLog {
        let db = sled::open(dir.path()).unwrap();
        let tree = db.open_tree("commits").unwrap();
        SledActionLog::new(tree)
    }

    #[test]
    fn appends_and_reads_back_across_a_fresh_handle() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = open_scratch(&dir);
            log.append(commit(1)).unwrap();
            log.append(commit(2)).unwrap();
        }
        let db = sled::open(dir.path()).unwrap();
        let tree = db.open_tree("commits").unwrap();
        let log = SledActionLog::new(tree);
        assert_eq!(log.len().unwrap(), 2);
        assert_eq!(log.get(2).unwrap(), Some(commit(2)));
    }

    #[test]
    fn rejects_non_contiguous_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_scratch(&dir);
        log.append(commit(1)).unwrap();
        let err = log.append(commit(5)).unwrap_err();
        assert!(matches!(
            err,
            ActionLogError::NonContiguousAppend {
                expected: 2,
                got: 5
            }
        ));
    }

    #[test]
    fn clear_resets_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open_scratch(&dir);
        log.append(commit(1)).unwrap();
        log.clear().unwrap();
        assert_eq!(log.len().unwrap(), 0);
        log.append(commit(1)).unwrap();
    }
}
