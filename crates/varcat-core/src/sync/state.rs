//! Per-study synchronization state.

use rkyv::{Archive, Deserialize, Serialize};

use crate::codec::{decode, put_checked, Revisioned};
use crate::error::Error;
use crate::storage::current_timestamp;

/// Synchronization status of a study.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, serde::Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Catalog matches storage.
    Synchronized,
    /// Some entities could not be converged.
    NotSynchronized,
    /// Never reconciled, or the last attempt did not reach a verdict.
    Unknown,
    /// A reconciliation is running.
    InProgress,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Synchronized => write!(f, "SYNCHRONIZED"),
            SyncStatus::NotSynchronized => write!(f, "NOT_SYNCHRONIZED"),
            SyncStatus::Unknown => write!(f, "UNKNOWN"),
            SyncStatus::InProgress => write!(f, "IN_PROGRESS"),
        }
    }
}

/// Persistent synchronization state of one study.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Serialize)]
pub struct StudySyncState {
    /// Fully qualified study name.
    pub study_id: String,
    /// Last time the study was found synchronized (microseconds since epoch).
    pub last_synced_at: Option<u64>,
    /// Current status.
    pub status: SyncStatus,
    /// Entities left divergent, sorted. Empty when synchronized.
    pub unresolved: Vec<String>,
    /// Why the study is UNKNOWN.
    pub last_error: Option<String>,
    /// Optimistic concurrency counter.
    pub revision: u64,
}

impl StudySyncState {
    /// Create the initial UNKNOWN state of a study.
    pub fn new(study_id: impl Into<String>) -> Self {
        Self {
            study_id: study_id.into(),
            last_synced_at: None,
            status: SyncStatus::Unknown,
            unresolved: Vec::new(),
            last_error: None,
            revision: 0,
        }
    }

    /// Mark a reconciliation as started.
    pub fn begin(&mut self) {
        self.status = SyncStatus::InProgress;
    }

    /// Record the verdict of a reconciliation.
    pub fn finish(&mut self, mut unresolved: Vec<String>) {
        unresolved.sort();
        unresolved.dedup();
        self.last_error = None;
        if unresolved.is_empty() {
            self.status = SyncStatus::Synchronized;
            self.last_synced_at = Some(current_timestamp());
        } else {
            self.status = SyncStatus::NotSynchronized;
        }
        self.unresolved = unresolved;
    }

    /// Record that no verdict could be reached.
    ///
    /// Unresolved ids belong to a verdict, so an earlier verdict's list is
    /// dropped. `last_synced_at` is kept.
    pub fn abandon(&mut self, reason: impl Into<String>) {
        self.status = SyncStatus::Unknown;
        self.unresolved.clear();
        self.last_error = Some(reason.into());
    }
}

impl Revisioned for StudySyncState {
    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }
}

/// Sync-state store contract.
pub trait SyncStateStore: Send + Sync {
    /// Fetch the state of a study.
    fn get(&self, study: &str) -> Result<Option<StudySyncState>, Error>;

    /// Save a state if the stored revision equals `state.revision`.
    ///
    /// Returns the stored state with its new revision, or
    /// [`Error::Conflict`].
    fn save(&self, state: &StudySyncState) -> Result<StudySyncState, Error>;

    /// All states.
    fn list(&self) -> Result<Vec<StudySyncState>, Error>;
}

/// Sync-state store persisted in sled.
pub struct SledSyncStateStore {
    tree: sled::Tree,
}

impl SledSyncStateStore {
    /// Tree name for study sync states.
    pub const TREE_NAME: &'static str = "sync:studies";

    /// Open or create the store.
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        Ok(Self {
            tree: db.open_tree(Self::TREE_NAME)?,
        })
    }

    /// Flush changes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }
}

impl SyncStateStore for SledSyncStateStore {
    fn get(&self, study: &str) -> Result<Option<StudySyncState>, Error> {
        match self.tree.get(study.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &StudySyncState) -> Result<StudySyncState, Error> {
        put_checked(&self.tree, state.study_id.as_bytes(), state)
    }

    fn list(&self) -> Result<Vec<StudySyncState>, Error> {
        self.tree
            .iter()
            .map(|result| {
                let (_, value) = result?;
                decode(&value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut state = StudySyncState::new("grch38:cancer");
        assert_eq!(state.status, SyncStatus::Unknown);

        state.begin();
        assert_eq!(state.status, SyncStatus::InProgress);

        state.finish(vec!["S3".to_string(), "S1".to_string(), "S3".to_string()]);
        assert_eq!(state.status, SyncStatus::NotSynchronized);
        assert_eq!(state.unresolved, vec!["S1", "S3"]);
        assert!(state.last_synced_at.is_none());

        state.abandon("backend hadoop unavailable");
        assert_eq!(state.status, SyncStatus::Unknown);
        assert!(state.unresolved.is_empty());
        assert_eq!(
            state.last_error.as_deref(),
            Some("backend hadoop unavailable")
        );

        state.finish(Vec::new());
        assert_eq!(state.status, SyncStatus::Synchronized);
        assert!(state.unresolved.is_empty());
        assert!(state.last_error.is_none());
        assert!(state.last_synced_at.is_some());
    }

    #[test]
    fn test_store_is_revision_checked() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = SledSyncStateStore::open(&db).unwrap();

        let mut state = StudySyncState::new("grch38:cancer");
        state.begin();
        let saved = store.save(&state).unwrap();
        assert_eq!(saved.revision, 1);

        // Saving the stale copy again must fail.
        assert!(matches!(store.save(&state), Err(Error::Conflict { .. })));

        let mut next = saved;
        next.finish(Vec::new());
        store.save(&next).unwrap();

        let loaded = store.get("grch38:cancer").unwrap().unwrap();
        assert_eq!(loaded.status, SyncStatus::Synchronized);
        assert_eq!(loaded.revision, 2);
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
