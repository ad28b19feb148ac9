//! Migration run log.
//!
//! One [`MigrationRun`] per descriptor records what the executor did with
//! it. Runs are audit records: they are created at first discovery, mutated
//! only by the executor and never deleted.

use std::collections::BTreeMap;

use rkyv::{Archive, Deserialize, Serialize};

use super::descriptor::{Domain, MigrationDescriptor};
use crate::codec::{decode, put_checked, Revisioned};
use crate::error::Error;
use crate::storage::current_timestamp;

/// State of a migration run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Discovered, not run yet.
    Pending,
    /// Body in flight.
    Running,
    /// Body returned normally.
    Completed,
    /// Body returned an error.
    Failed,
    /// Not run because the engine is past the deprecation version.
    SkippedDeprecated,
    /// Not run because the target version is below the supported floor.
    SkippedOutdated,
}

impl RunStatus {
    /// Settled runs are never revisited by the executor.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::SkippedDeprecated | RunStatus::SkippedOutdated
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "PENDING"),
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Completed => write!(f, "COMPLETED"),
            RunStatus::Failed => write!(f, "FAILED"),
            RunStatus::SkippedDeprecated => write!(f, "SKIPPED_DEPRECATED"),
            RunStatus::SkippedOutdated => write!(f, "SKIPPED_OUTDATED"),
        }
    }
}

/// Persistent record of one migration.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Serialize)]
pub struct MigrationRun {
    /// Descriptor id.
    pub descriptor_id: String,
    /// Domain of the descriptor.
    pub domain: Domain,
    /// Declared target version.
    pub target_version: String,
    /// Descriptor description.
    pub description: String,
    /// Current status.
    pub status: RunStatus,
    /// When the body last started (microseconds since epoch).
    pub started_at: Option<u64>,
    /// When the run last settled or failed (microseconds since epoch).
    pub finished_at: Option<u64>,
    /// Error message of the last failure or skip.
    pub error: Option<String>,
    /// Descriptor patch level the run was executed at.
    pub patch: u32,
    /// Number of body invocations.
    pub attempts: u32,
    /// Optimistic concurrency counter.
    pub revision: u64,
}

impl MigrationRun {
    /// Create a pending run for a descriptor.
    pub fn pending(descriptor: &MigrationDescriptor) -> Self {
        Self {
            descriptor_id: descriptor.id.clone(),
            domain: descriptor.domain,
            target_version: descriptor.target_version.clone(),
            description: descriptor.description.clone(),
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            error: None,
            patch: descriptor.patch,
            attempts: 0,
            revision: 0,
        }
    }

    /// Mark the body as started.
    pub fn start(&mut self, patch: u32) {
        self.status = RunStatus::Running;
        self.started_at = Some(current_timestamp());
        self.finished_at = None;
        self.error = None;
        self.patch = patch;
        self.attempts += 1;
    }

    /// Mark the run as completed.
    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(current_timestamp());
    }

    /// Mark the run as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(current_timestamp());
        self.error = Some(error.into());
    }

    /// Skip the run without invoking the body.
    pub fn skip(&mut self, status: RunStatus, reason: impl Into<String>) {
        debug_assert!(matches!(
            status,
            RunStatus::SkippedDeprecated | RunStatus::SkippedOutdated
        ));
        self.status = status;
        self.finished_at = Some(current_timestamp());
        self.error = Some(reason.into());
    }

    /// Reset an interrupted run so it is evaluated again.
    pub fn reset(&mut self) {
        self.status = RunStatus::Pending;
        self.error = Some("interrupted while running".to_string());
    }
}

impl Revisioned for MigrationRun {
    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }
}

/// Run log contract.
pub trait RunLog: Send + Sync {
    /// Fetch the run of a descriptor.
    fn get(&self, descriptor_id: &str) -> Result<Option<MigrationRun>, Error>;

    /// Insert or update a run.
    ///
    /// The write only lands if the stored revision equals `run.revision`;
    /// otherwise [`Error::Conflict`] is returned. On success the stored run,
    /// with its new revision, is returned.
    fn upsert(&self, run: &MigrationRun) -> Result<MigrationRun, Error>;

    /// List runs, optionally restricted to one domain.
    fn list(&self, domain: Option<Domain>) -> Result<Vec<MigrationRun>, Error>;
}

/// Run log persisted in sled.
pub struct SledRunLog {
    tree: sled::Tree,
}

impl SledRunLog {
    /// Tree name for migration runs.
    pub const TREE_NAME: &'static str = "migration:runs";

    /// Open or create the run log.
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

impl RunLog for SledRunLog {
    fn get(&self, descriptor_id: &str) -> Result<Option<MigrationRun>, Error> {
        match self.tree.get(descriptor_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn upsert(&self, run: &MigrationRun) -> Result<MigrationRun, Error> {
        put_checked(&self.tree, run.descriptor_id.as_bytes(), run)
    }

    fn list(&self, domain: Option<Domain>) -> Result<Vec<MigrationRun>, Error> {
        let mut runs = Vec::new();
        for result in self.tree.iter() {
            let (_, value) = result?;
            let run: MigrationRun = decode(&value)?;
            if domain.map_or(true, |d| d == run.domain) {
                runs.push(run);
            }
        }
        Ok(runs)
    }
}

/// A completed run whose descriptor has since been patched.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PatchDrift {
    /// Descriptor id.
    pub id: String,
    /// Patch level the run was executed at.
    pub applied_patch: u32,
    /// Current descriptor patch level.
    pub current_patch: u32,
}

/// Aggregate view over the run log.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunSummary {
    /// Number of runs per status.
    pub counts: BTreeMap<RunStatus, usize>,
    /// Migrations that still have to be applied, in execution order.
    pub to_apply: Vec<String>,
    /// Completed runs executed at an older patch level.
    pub drifted: Vec<PatchDrift>,
}

impl RunSummary {
    /// Number of runs in a status.
    pub fn count(&self, status: RunStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> MigrationDescriptor {
        MigrationDescriptor::new("add_cohort_stats", Domain::Catalog, "2.1.0", 20240301)
            .with_description("Add cohort statistics status")
            .with_patch(2)
    }

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    #[test]
    fn test_run_lifecycle() {
        let mut run = MigrationRun::pending(&descriptor());
        assert_eq!(run.status, RunStatus::Pending);
        assert!(!run.status.is_settled());

        run.start(2);
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());
        assert_eq!(run.attempts, 1);

        run.fail("catalog unreachable");
        assert_eq!(run.status, RunStatus::Failed);
        assert!(!run.status.is_settled());
        assert_eq!(run.error.as_deref(), Some("catalog unreachable"));

        run.start(2);
        run.complete();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.status.is_settled());
        assert!(run.error.is_none());
        assert_eq!(run.attempts, 2);
    }

    #[test]
    fn test_upsert_is_revision_checked() {
        let db = test_db();
        let log = SledRunLog::open(&db).unwrap();

        let stored = log.upsert(&MigrationRun::pending(&descriptor())).unwrap();
        assert_eq!(stored.revision, 1);

        // A second writer still holding revision 0 loses.
        let stale = MigrationRun::pending(&descriptor());
        let err = log.upsert(&stale).unwrap_err();
        assert!(matches!(err, Error::Conflict { expected: 0, found: 1, .. }));

        let mut run = stored;
        run.start(2);
        let stored = log.upsert(&run).unwrap();
        assert_eq!(stored.revision, 2);
        assert_eq!(log.get("add_cohort_stats").unwrap().unwrap().status, RunStatus::Running);
    }

    #[test]
    fn test_list_by_domain() {
        let db = test_db();
        let log = SledRunLog::open(&db).unwrap();

        log.upsert(&MigrationRun::pending(&descriptor())).unwrap();
        let storage = MigrationDescriptor::new("rebuild_archive", Domain::Storage, "2.1.0", 20240301);
        log.upsert(&MigrationRun::pending(&storage)).unwrap();

        assert_eq!(log.list(None).unwrap().len(), 2);
        let runs = log.list(Some(Domain::Storage)).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].descriptor_id, "rebuild_archive");
    }

    #[test]
    fn test_run_log_persistence() {
        let dir = tempfile::tempdir().unwrap();

        {
            let db = sled::open(dir.path()).unwrap();
            let log = SledRunLog::open(&db).unwrap();
            let mut run = log.upsert(&MigrationRun::pending(&descriptor())).unwrap();
            run.start(2);
            run.complete();
            log.upsert(&run).unwrap();
            log.flush().unwrap();
        }

        let db = sled::open(dir.path()).unwrap();
        let log = SledRunLog::open(&db).unwrap();
        let run = log.get("add_cohort_stats").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.patch, 2);
        assert_eq!(run.revision, 2);
    }
}
