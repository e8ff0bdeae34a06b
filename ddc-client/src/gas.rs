//! Usage accounting
//!
//! Gas entries accumulate in an engine list. Settling takes a snapshot
//! of the list under a fresh commit id; the snapshot is then either
//! committed (dropped) or reverted (returned to the engine). An entry is
//! always in exactly one place: the engine or one open snapshot.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::mem;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier of an open usage snapshot
pub type CommitId = Uuid;

/// One unit of consumed resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasEntry {
    /// Consumed amount (bytes for storage operations)
    pub amount: u64,

    /// When the usage was recorded
    pub recorded_at: DateTime<Utc>,
}

impl GasEntry {
    pub fn new(amount: u64) -> Self {
        Self {
            amount,
            recorded_at: Utc::now(),
        }
    }
}

/// Thread-safe gas counter with commit/revert snapshots
#[derive(Debug, Default)]
pub struct GasCounter {
    /// Uncommitted entries
    engine: Mutex<Vec<GasEntry>>,

    /// Snapshots awaiting commit or revert
    commits: Mutex<HashMap<CommitId, Vec<GasEntry>>>,
}

impl GasCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record consumed resources
    pub fn push(&self, amount: u64) {
        self.push_entry(GasEntry::new(amount));
    }

    pub fn push_entry(&self, entry: GasEntry) {
        self.engine.lock().push(entry);
    }

    /// Move every uncommitted entry into a new snapshot.
    ///
    /// Returns the snapshot total and its commit id. Entries pushed after
    /// this call are not part of the snapshot.
    pub fn read_uncommitted(&self) -> (u64, CommitId) {
        let id = Uuid::new_v4();
        // Lock order: commits, then engine
        let mut commits = self.commits.lock();
        let entries = mem::take(&mut *self.engine.lock());
        let total = sum(&entries);

        debug!(commit = %id, entries = entries.len(), total, "Usage snapshot taken");
        commits.insert(id, entries);

        (total, id)
    }

    /// Drop a snapshot once its usage has been settled.
    ///
    /// Returns false if the id is unknown or already resolved.
    pub fn commit(&self, id: CommitId) -> bool {
        let found = self.commits.lock().remove(&id).is_some();
        if !found {
            warn!(commit = %id, "Commit of unknown usage snapshot ignored");
        }
        found
    }

    /// Return a snapshot's entries to the engine.
    ///
    /// Returns false if the id is unknown or already resolved.
    pub fn revert(&self, id: CommitId) -> bool {
        let mut commits = self.commits.lock();
        let Some(entries) = commits.remove(&id) else {
            warn!(commit = %id, "Revert of unknown usage snapshot ignored");
            return false;
        };

        debug!(commit = %id, entries = entries.len(), "Usage snapshot reverted");
        self.engine.lock().extend(entries);
        true
    }

    /// Total of uncommitted entries, saturating at `u64::MAX`
    pub fn pending_total(&self) -> u64 {
        sum(&self.engine.lock())
    }

    /// Total of uncommitted entries and open snapshots together
    pub fn outstanding_total(&self) -> u64 {
        let commits = self.commits.lock();
        let engine = self.engine.lock();
        commits
            .values()
            .map(|entries| sum(entries))
            .fold(sum(&engine), u64::saturating_add)
    }

    /// Number of uncommitted entries
    pub fn pending_len(&self) -> usize {
        self.engine.lock().len()
    }

    /// Number of snapshots neither committed nor reverted
    pub fn open_commits(&self) -> usize {
        self.commits.lock().len()
    }
}

fn sum(entries: &[GasEntry]) -> u64 {
    entries
        .iter()
        .fold(0u64, |total, e| total.saturating_add(e.amount))
}
