//! Reconciliation engine - converges cached catalog status with storage.
//!
//! For each study:
//!
//! 1. mark the study IN_PROGRESS,
//! 2. ask the backend for authoritative per-entity status,
//! 3. diff it against the catalog,
//! 4. compare-and-set every divergent entity, re-reading on conflict,
//! 5. record SYNCHRONIZED or NOT_SYNCHRONIZED with the unresolved ids.
//!
//! A study that cannot reach a verdict (backend down, no adapter, timeout)
//! is recorded as UNKNOWN with the reason. Batches reconcile studies
//! concurrently on a bounded pool; one study's failure never aborts the
//! batch.
//!
//! A pass owns the study state at the revision it saved when marking it
//! IN_PROGRESS. When passes over the same study overlap, the latest one to
//! start owns it: an older pass whose verdict save conflicts with a newer
//! IN_PROGRESS state leaves the record to that pass, and an older pass that
//! fails never overwrites state it no longer owns.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::diff::{self, DivergentEntity};
use super::error::SyncError;
use super::state::{StudySyncState, SyncStateStore, SyncStatus};
use crate::catalog::{CasOutcome, CatalogStore, StudyRef};
use crate::config::EngineConfig;
use crate::context::StorageContext;
use crate::error::Error;
use crate::storage::BackendError;

/// Cooperative cancellation for a batch.
///
/// Cancelling stops dispatch of further studies; studies already running
/// finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Create a handle that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Result of reconciling one study.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StudyOutcome {
    /// Fully qualified study name.
    pub study: String,
    /// Final status.
    pub status: SyncStatus,
    /// Catalog writes performed.
    pub writes: usize,
    /// Entities left divergent.
    pub unresolved: Vec<String>,
    /// Why no verdict was reached.
    pub error: Option<String>,
}

impl StudyOutcome {
    fn unknown(study: &str, reason: String) -> Self {
        Self {
            study: study.to_string(),
            status: SyncStatus::Unknown,
            writes: 0,
            unresolved: Vec::new(),
            error: Some(reason),
        }
    }
}

/// Result of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchReport {
    /// Outcomes of attempted studies, sorted by study.
    pub outcomes: Vec<StudyOutcome>,
    /// Studies not dispatched because the batch was cancelled.
    pub not_attempted: Vec<String>,
}

impl BatchReport {
    /// True when every targeted study ended SYNCHRONIZED.
    pub fn all_synchronized(&self) -> bool {
        self.not_attempted.is_empty()
            && self
                .outcomes
                .iter()
                .all(|outcome| outcome.status == SyncStatus::Synchronized)
    }

    /// Number of attempted studies in a status.
    pub fn count(&self, status: SyncStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Total catalog writes across the batch.
    pub fn writes(&self) -> usize {
        self.outcomes.iter().map(|o| o.writes).sum()
    }

    /// Outcome of one study.
    pub fn outcome(&self, study: &str) -> Option<&StudyOutcome> {
        self.outcomes.iter().find(|o| o.study == study)
    }
}

/// Claim value of a pass that has not marked its study IN_PROGRESS yet.
const UNCLAIMED: u64 = 0;

enum Settled {
    Written,
    Converged,
    Gone,
    Exhausted,
}

/// Reconciliation engine.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn SyncStateStore>,
    config: EngineConfig,
}

impl ReconciliationEngine {
    /// Create an engine over a sync-state store.
    pub fn new(store: Arc<dyn SyncStateStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// The sync-state store.
    pub fn store(&self) -> &Arc<dyn SyncStateStore> {
        &self.store
    }

    /// Reconcile one study.
    ///
    /// Fails with [`SyncError::UnknownStudy`] before touching any state when
    /// the study is not registered. On other errors the study state may
    /// have been left IN_PROGRESS; batch callers go through
    /// [`reconcile_batch`](Self::reconcile_batch), which records UNKNOWN
    /// instead.
    pub async fn reconcile_study(
        &self,
        ctx: &StorageContext,
        study: &StudyRef,
    ) -> Result<StudyOutcome, SyncError> {
        self.reconcile_claimed(ctx, study, &AtomicU64::new(UNCLAIMED))
            .await
    }

    /// Reconcile one study, publishing the revision this pass owns to
    /// `claim` as soon as the study is marked IN_PROGRESS.
    async fn reconcile_claimed(
        &self,
        ctx: &StorageContext,
        study: &StudyRef,
        claim: &AtomicU64,
    ) -> Result<StudyOutcome, SyncError> {
        let catalog = ctx.catalog();
        if catalog.study(&study.fqn)?.is_none() {
            return Err(SyncError::UnknownStudy {
                study: study.fqn.clone(),
            });
        }
        let resolved = ctx.backend(&study.project)?;

        let state = self.claim(&study.fqn)?;
        claim.store(state.revision, Ordering::SeqCst);

        let members = resolved.backend.cluster_members().await?;
        if resolved.adapter.live_nodes(&members).is_empty() {
            return Err(BackendError::Unavailable {
                backend: resolved.backend.backend_id().to_string(),
                reason: "no live nodes".to_string(),
            }
            .into());
        }

        let authoritative = resolved.backend.study_status(&study.fqn).await?;
        if authoritative.is_none() {
            tracing::info!(study = %study, "study not present in storage, cached status reset to none");
        }

        let cached = catalog.entities(&study.fqn)?;
        let divergence = diff::compute(resolved.adapter.as_ref(), &cached, authoritative.as_deref());
        for id in &divergence.ignored {
            tracing::debug!(study = %study, entity = %id, "entity unknown to catalog, ignored");
        }
        for (id, code) in &divergence.untranslated {
            tracing::warn!(
                study = %study,
                entity = %id,
                code = %code,
                adapter = resolved.adapter.name(),
                "untranslatable status code"
            );
        }
        for (id, kind) in &divergence.mismatched {
            tracing::warn!(
                study = %study,
                entity = %id,
                reported_kind = %kind,
                "storage reports a different entity kind, cached status kept"
            );
        }

        let mut writes = 0;
        let mut unresolved = Vec::new();
        for entity in &divergence.divergent {
            match self.settle(catalog.as_ref(), &study.fqn, entity)? {
                Settled::Written => writes += 1,
                Settled::Converged | Settled::Gone => {}
                Settled::Exhausted => {
                    tracing::warn!(
                        study = %study,
                        entity = %entity.id,
                        retries = self.config.max_conflict_retries,
                        "conflict retries exhausted"
                    );
                    unresolved.push(entity.id.clone());
                }
            }
        }

        let mut verdict = state.clone();
        verdict.finish(unresolved);
        let recorded = self.record(state, &verdict.unresolved)?;
        tracing::info!(
            study = %study,
            status = %verdict.status,
            compared = divergence.compared,
            divergent = divergence.divergent.len(),
            writes,
            recorded = recorded.is_some(),
            "study reconciled"
        );

        Ok(StudyOutcome {
            study: study.fqn.clone(),
            status: verdict.status,
            writes,
            unresolved: verdict.unresolved,
            error: None,
        })
    }

    /// Reconcile studies concurrently.
    ///
    /// At most `worker_pool_size` studies run at once and each gets
    /// `study_timeout`. Failed and timed-out studies are recorded UNKNOWN.
    pub async fn reconcile_batch(
        &self,
        ctx: &StorageContext,
        studies: Vec<StudyRef>,
        cancel: &CancelHandle,
    ) -> BatchReport {
        let semaphore = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));
        let timeout = self.config.study_timeout;
        let mut tasks = JoinSet::new();
        let mut dispatched = Vec::with_capacity(studies.len());
        let mut report = BatchReport::default();

        let mut pending = studies.into_iter();
        for study in pending.by_ref() {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    report.not_attempted.push(study.fqn);
                    break;
                }
            };
            if cancel.is_cancelled() {
                report.not_attempted.push(study.fqn);
                break;
            }

            let claim = Arc::new(AtomicU64::new(UNCLAIMED));
            dispatched.push((study.fqn.clone(), Arc::clone(&claim)));
            let engine = self.clone();
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let pass = engine.reconcile_claimed(&ctx, &study, &claim);
                match tokio::time::timeout(timeout, pass).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e @ SyncError::UnknownStudy { .. })) => {
                        tracing::warn!(study = %study, "study not registered, nothing recorded");
                        StudyOutcome::unknown(&study.fqn, e.to_string())
                    }
                    Ok(Err(e)) => {
                        engine.abandon(&study.fqn, e.to_string(), claim.load(Ordering::SeqCst))
                    }
                    Err(_) => engine.abandon(
                        &study.fqn,
                        format!("timed out after {timeout:?}"),
                        claim.load(Ordering::SeqCst),
                    ),
                }
            });
        }
        report
            .not_attempted
            .extend(pending.map(|study| study.fqn));

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "reconciliation worker panicked"),
            }
        }

        // A panicked worker leaves no outcome behind.
        let reported: HashSet<String> = report.outcomes.iter().map(|o| o.study.clone()).collect();
        for (study, claim) in dispatched.into_iter().filter(|(s, _)| !reported.contains(s)) {
            let outcome = self.abandon(
                &study,
                "reconciliation worker panicked".to_string(),
                claim.load(Ordering::SeqCst),
            );
            report.outcomes.push(outcome);
        }

        report.outcomes.sort_by(|a, b| a.study.cmp(&b.study));
        if !report.not_attempted.is_empty() {
            tracing::info!(skipped = report.not_attempted.len(), "batch cancelled");
        }
        tracing::info!(
            studies = report.outcomes.len(),
            synchronized = report.count(SyncStatus::Synchronized),
            not_synchronized = report.count(SyncStatus::NotSynchronized),
            unknown = report.count(SyncStatus::Unknown),
            writes = report.writes(),
            "batch reconciled"
        );
        report
    }

    /// Reconcile every study of a project.
    pub async fn reconcile_project(
        &self,
        ctx: &StorageContext,
        project: &str,
        cancel: &CancelHandle,
    ) -> Result<BatchReport, SyncError> {
        let studies = ctx.catalog().list_studies(Some(project))?;
        Ok(self.reconcile_batch(ctx, studies, cancel).await)
    }

    /// Reconcile every study in the catalog.
    pub async fn reconcile_all(
        &self,
        ctx: &StorageContext,
        cancel: &CancelHandle,
    ) -> Result<BatchReport, SyncError> {
        let studies = ctx.catalog().list_studies(None)?;
        Ok(self.reconcile_batch(ctx, studies, cancel).await)
    }

    /// Write one divergent entity, retrying on version conflicts.
    fn settle(
        &self,
        catalog: &dyn CatalogStore,
        study: &str,
        entity: &DivergentEntity,
    ) -> Result<Settled, Error> {
        let mut expected_version = entity.version;
        for _ in 0..=self.config.max_conflict_retries {
            match catalog.compare_and_set_status(study, &entity.id, expected_version, entity.authoritative) {
                Ok(CasOutcome::Applied { .. }) => {
                    tracing::debug!(
                        study,
                        entity = %entity.id,
                        from = %entity.cached,
                        to = %entity.authoritative,
                        "entity status updated"
                    );
                    return Ok(Settled::Written);
                }
                Ok(CasOutcome::Conflict) => {}
                Err(Error::NotFound(_)) => return Ok(Settled::Gone),
                Err(e) => return Err(e),
            }

            match catalog.entity(study, &entity.id)? {
                None => return Ok(Settled::Gone),
                Some(current) if current.deleted => return Ok(Settled::Gone),
                Some(current) if current.status == entity.authoritative => {
                    return Ok(Settled::Converged)
                }
                Some(current) => expected_version = current.version,
            }
        }
        Ok(Settled::Exhausted)
    }

    /// Mark a study IN_PROGRESS, returning the state this pass now owns.
    fn claim(&self, study: &str) -> Result<StudySyncState, Error> {
        let mut attempts = 0;
        loop {
            let mut state = self
                .store
                .get(study)?
                .unwrap_or_else(|| StudySyncState::new(study));
            state.begin();
            match self.store.save(&state) {
                Err(Error::Conflict { .. }) if attempts < self.config.max_conflict_retries => {
                    attempts += 1;
                }
                result => return result,
            }
        }
    }

    /// Save the verdict of the pass that owns `claimed`.
    ///
    /// Returns `None` without writing when a newer pass has marked the
    /// study IN_PROGRESS since; that pass records its own verdict. A verdict
    /// recorded meanwhile by another pass is overwritten.
    fn record(
        &self,
        claimed: StudySyncState,
        unresolved: &[String],
    ) -> Result<Option<StudySyncState>, Error> {
        let mut state = claimed;
        let mut attempts = 0;
        loop {
            state.finish(unresolved.to_vec());
            match self.store.save(&state) {
                Ok(saved) => return Ok(Some(saved)),
                Err(Error::Conflict { .. }) if attempts < self.config.max_conflict_retries => {
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }

            let current = self
                .store
                .get(&state.study_id)?
                .unwrap_or_else(|| StudySyncState::new(&state.study_id));
            if current.status == SyncStatus::InProgress {
                tracing::debug!(
                    study = %state.study_id,
                    status = %state.status,
                    "newer reconciliation in progress, verdict left to it"
                );
                return Ok(None);
            }
            state = current;
        }
    }

    /// Record a study as UNKNOWN.
    ///
    /// `owned` is the revision the failed pass claimed, or [`UNCLAIMED`].
    fn abandon(&self, study: &str, reason: String, owned: u64) -> StudyOutcome {
        tracing::warn!(study, reason = %reason, "study left unknown");
        match self.mark_unknown(study, &reason, owned) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(study, "state owned by another reconciliation, unknown not recorded")
            }
            Err(e) => tracing::error!(study, error = %e, "failed to record unknown sync state"),
        }
        StudyOutcome::unknown(study, reason)
    }

    /// Returns `false` when the state belongs to another pass.
    fn mark_unknown(&self, study: &str, reason: &str, owned: u64) -> Result<bool, Error> {
        let mut attempts = 0;
        loop {
            let mut state = self
                .store
                .get(study)?
                .unwrap_or_else(|| StudySyncState::new(study));
            let foreign = if owned == UNCLAIMED {
                state.status == SyncStatus::InProgress
            } else {
                state.revision != owned
            };
            if foreign {
                return Ok(false);
            }

            state.abandon(reason);
            match self.store.save(&state) {
                Ok(_) => return Ok(true),
                Err(Error::Conflict { .. }) if attempts < self.config.max_conflict_retries => {
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
