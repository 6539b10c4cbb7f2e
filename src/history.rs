//! Revision history of committed trees
//!
//! Every commit records a [`Snapshot`]: the committed tree, its SHA-256
//! content hash, the revision it was committed on top of and the changelog
//! that produced it. The history is bounded; recording beyond `depth`
//! prunes the oldest revisions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::diff::Changelog;
use crate::error::TreeError;
use crate::meta::App;

/// Number of revisions kept when no depth is configured
pub const DEFAULT_DEPTH: usize = 16;

/// One committed revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub revision: u64,
    /// Hex SHA-256 of the tree's JSON form
    pub hash: String,
    /// Revision this one was committed on top of
    pub parent: Option<u64>,
    pub tree: App,
    /// Changes from the parent revision
    pub changes: Changelog,
}

/// Statistics from a pruning pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneResult {
    pub retained: usize,
    pub pruned: usize,
    pub total_before: usize,
}

impl PruneResult {
    #[inline]
    pub fn did_prune(&self) -> bool {
        self.pruned > 0
    }
}

/// Bounded, revision-ordered snapshot history
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    snapshots: BTreeMap<u64, Snapshot>,
    depth: usize,
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH)
    }
}

/// Hex SHA-256 of the JSON serialization of `tree`
pub fn content_hash(tree: &App) -> Result<String, TreeError> {
    let bytes = serde_json::to_vec(tree)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

impl SnapshotHistory {
    /// History keeping at most `depth` revisions (at least one)
    pub fn new(depth: usize) -> Self {
        Self {
            snapshots: BTreeMap::new(),
            depth: depth.max(1),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Record `tree` as `revision`, then prune to the configured depth.
    /// Returns the content hash.
    pub fn record(&mut self, revision: u64, tree: &App, changes: Changelog) -> Result<String, TreeError> {
        let hash = content_hash(tree)?;
        let parent = self.latest().map(|s| s.revision);
        self.snapshots.insert(
            revision,
            Snapshot {
                revision,
                hash: hash.clone(),
                parent,
                tree: tree.clone(),
                changes,
            },
        );
        self.prune();
        Ok(hash)
    }

    pub fn get(&self, revision: u64) -> Option<&Snapshot> {
        self.snapshots.get(&revision)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.values().next_back()
    }

    pub fn contains(&self, revision: u64) -> bool {
        self.snapshots.contains_key(&revision)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Retained revisions, oldest first
    pub fn revisions(&self) -> Vec<u64> {
        self.snapshots.keys().copied().collect()
    }

    /// Revisions the next prune would remove, without removing them
    pub fn prune_candidates(&self) -> Vec<u64> {
        let excess = self.snapshots.len().saturating_sub(self.depth);
        self.snapshots.keys().take(excess).copied().collect()
    }

    /// Drop the oldest revisions beyond `depth`
    pub fn prune(&mut self) -> PruneResult {
        let total_before = self.snapshots.len();
        let candidates = self.prune_candidates();
        for revision in &candidates {
            self.snapshots.remove(revision);
        }
        PruneResult {
            retained: self.snapshots.len(),
            pruned: candidates.len(),
            total_before,
        }
    }
}
