//! Migration executor - drives ordered migrations through the run state
//! machine.
//!
//! ```text
//! PENDING -> RUNNING -> COMPLETED
//!                    -> FAILED            (halts the domain)
//!         -> SKIPPED_DEPRECATED           (engine >= deprecated_since)
//!         -> SKIPPED_OUTDATED             (target < supported floor)
//! ```
//!
//! Every transition is persisted to the run log before the next step, so a
//! crash leaves at most one run in RUNNING; it is reset to PENDING on the
//! next invocation.

use std::collections::HashMap;
use std::sync::Arc;

use super::descriptor::Domain;
use super::error::{MigrationError, OutdatedMigrationError};
use super::registry::{MigrationRegistry, ResolvedMigration};
use super::state::{MigrationRun, PatchDrift, RunLog, RunStatus, RunSummary};
use crate::config::EngineConfig;
use crate::context::{ContextProvider, DomainContext};
use crate::version::Version;

/// Which migrations of a domain an invocation covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSelection {
    /// Only migrations targeting this version or earlier.
    pub up_to: Option<Version>,
    /// Only these ids. Manual migrations must be named here to run.
    pub ids: Vec<String>,
}

impl MigrationSelection {
    /// Every migration of the domain.
    pub fn all() -> Self {
        Self::default()
    }

    /// Migrations up to and including a target version.
    pub fn up_to(version: Version) -> Self {
        Self {
            up_to: Some(version),
            ids: Vec::new(),
        }
    }

    /// Explicitly selected migrations.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            up_to: None,
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// Result of one executor invocation.
#[derive(Debug)]
pub struct RunReport {
    /// Domain that was run.
    pub domain: Domain,
    /// Final state of every selected run, in execution order.
    pub runs: Vec<MigrationRun>,
    /// Migrations skipped because they are outdated.
    pub outdated: Vec<OutdatedMigrationError>,
    /// Why the invocation ran nothing, when it was deferred.
    pub deferred: Option<String>,
    /// The failure that halted the domain.
    pub failure: Option<MigrationError>,
}

impl RunReport {
    /// Create an empty report for a domain.
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            runs: Vec::new(),
            outdated: Vec::new(),
            deferred: None,
            failure: None,
        }
    }

    /// True when every selected run ended COMPLETED or SKIPPED_*.
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.runs.iter().all(|run| run.status.is_settled())
    }

    /// Number of runs in a status.
    pub fn count(&self, status: RunStatus) -> usize {
        self.runs.iter().filter(|run| run.status == status).count()
    }
}

/// Run log view for `migrate status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusReport {
    /// Runs in registry order; runs of descriptors no longer in the
    /// manifest come last.
    pub runs: Vec<MigrationRun>,
    /// Aggregates.
    pub summary: RunSummary,
}

enum Disposition {
    Deprecated,
    Outdated,
    Execute,
}

/// Migration executor.
///
/// Runs of one domain are strictly sequential. The executor does not
/// coordinate with other processes; callers hold the migration lock.
pub struct MigrationExecutor {
    registry: Arc<MigrationRegistry>,
    run_log: Arc<dyn RunLog>,
    contexts: Arc<dyn ContextProvider>,
    config: EngineConfig,
}

impl MigrationExecutor {
    /// Create a new migration executor.
    pub fn new(
        registry: Arc<MigrationRegistry>,
        run_log: Arc<dyn RunLog>,
        contexts: Arc<dyn ContextProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            run_log,
            contexts,
            config,
        }
    }

    /// The registry.
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Run the selected migrations of a domain.
    ///
    /// Descriptor and selection problems, manual migrations that were not
    /// selected, and run log errors are returned as `Err` before or between
    /// runs. A failing body is not an `Err`: it is recorded in the run and
    /// in [`RunReport::failure`], and halts the rest of the domain.
    pub async fn run(
        &self,
        domain: Domain,
        selection: &MigrationSelection,
    ) -> Result<RunReport, MigrationError> {
        let selected = self.select(domain, selection)?;
        tracing::info!(domain = %domain, selected = selected.len(), "running migrations");

        let mut runs = Vec::with_capacity(selected.len());
        for migration in &selected {
            runs.push(self.prepare(migration)?);
        }

        for (migration, run) in selected.iter().zip(&runs) {
            if migration.descriptor.manual
                && !run.status.is_settled()
                && matches!(self.disposition(migration), Disposition::Execute)
                && !selection.ids.iter().any(|id| id == migration.id())
            {
                return Err(MigrationError::ManualMigrationRequired {
                    id: migration.id().to_string(),
                });
            }
        }

        let mut report = RunReport::new(domain);

        if domain == Domain::Storage && self.config.is_storage_read_only() {
            let reason = format!("storage is {}", self.config.storage_mode);
            tracing::info!(domain = %domain, reason = %reason, "deferring storage migrations");
            report.deferred = Some(reason);
            report.runs = runs;
            return Ok(report);
        }

        let mut context: Option<DomainContext> = None;
        let mut remaining = selected.into_iter().zip(runs);

        for (migration, mut run) in remaining.by_ref() {
            if run.status.is_settled() {
                report.runs.push(run);
                continue;
            }

            match self.disposition(migration) {
                Disposition::Deprecated => {
                    let since = migration.deprecated_since.unwrap_or(migration.target);
                    run.skip(
                        RunStatus::SkippedDeprecated,
                        format!("deprecated since {since}, engine is {}", self.config.engine_version),
                    );
                    run = self.run_log.upsert(&run)?;
                    tracing::info!(id = migration.id(), since = %since, "skipped deprecated migration");
                }
                Disposition::Outdated => {
                    let err = OutdatedMigrationError::new(
                        migration.id(),
                        &migration.target,
                        &self.config.min_migration_version,
                    );
                    run.skip(RunStatus::SkippedOutdated, err.to_string());
                    run = self.run_log.upsert(&run)?;
                    tracing::warn!(id = migration.id(), error = %err, "outdated migration");
                    report.outdated.push(err);
                }
                Disposition::Execute => {
                    run.start(migration.descriptor.patch);
                    run = self.run_log.upsert(&run)?;
                    tracing::info!(
                        id = migration.id(),
                        target = %migration.target,
                        attempt = run.attempts,
                        "migration started"
                    );

                    let outcome = match context.as_ref() {
                        Some(ctx) => migration
                            .body
                            .run(ctx)
                            .await
                            .map_err(|e| MigrationError::Body {
                                id: migration.id().to_string(),
                                message: e.to_string(),
                            }),
                        None => match self.contexts.context(domain) {
                            Ok(ctx) => {
                                let outcome = migration.body.run(&ctx).await.map_err(|e| {
                                    MigrationError::Body {
                                        id: migration.id().to_string(),
                                        message: e.to_string(),
                                    }
                                });
                                context = Some(ctx);
                                outcome
                            }
                            Err(e) => Err(e),
                        },
                    };

                    match outcome {
                        Ok(()) => {
                            run.complete();
                            run = self.run_log.upsert(&run)?;
                            tracing::info!(id = migration.id(), "migration completed");
                        }
                        Err(e) => {
                            run.fail(e.to_string());
                            run = self.run_log.upsert(&run)?;
                            tracing::error!(id = migration.id(), error = %e, "migration failed, halting domain");
                            report.runs.push(run);
                            report.failure = Some(e);
                            break;
                        }
                    }
                }
            }
            report.runs.push(run);
        }

        // Runs after a failure stay PENDING.
        report.runs.extend(remaining.map(|(_, run)| run));
        Ok(report)
    }

    /// Run log view with a summary, optionally restricted to one domain.
    pub fn status(&self, domain: Option<Domain>) -> Result<StatusReport, MigrationError> {
        let mut runs = self.run_log.list(domain)?;
        let position: HashMap<&str, usize> = self
            .registry
            .migrations()
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id(), i))
            .collect();
        runs.sort_by(|a, b| {
            let pa = position.get(a.descriptor_id.as_str()).copied().unwrap_or(usize::MAX);
            let pb = position.get(b.descriptor_id.as_str()).copied().unwrap_or(usize::MAX);
            pa.cmp(&pb).then_with(|| a.descriptor_id.cmp(&b.descriptor_id))
        });

        let by_id: HashMap<&str, &MigrationRun> =
            runs.iter().map(|run| (run.descriptor_id.as_str(), run)).collect();

        let mut summary = RunSummary::default();
        for run in &runs {
            *summary.counts.entry(run.status).or_insert(0) += 1;
        }
        for migration in self.registry.migrations() {
            if domain.is_some_and(|d| d != migration.descriptor.domain) {
                continue;
            }
            match by_id.get(migration.id()) {
                None => summary.to_apply.push(migration.id().to_string()),
                Some(run) if !run.status.is_settled() => {
                    summary.to_apply.push(migration.id().to_string())
                }
                Some(run) if run.status == RunStatus::Completed && run.patch < migration.descriptor.patch => {
                    summary.drifted.push(PatchDrift {
                        id: migration.id().to_string(),
                        applied_patch: run.patch,
                        current_patch: migration.descriptor.patch,
                    });
                }
                Some(_) => {}
            }
        }

        Ok(StatusReport { runs, summary })
    }

    fn select(
        &self,
        domain: Domain,
        selection: &MigrationSelection,
    ) -> Result<Vec<&ResolvedMigration>, MigrationError> {
        let ids = (!selection.ids.is_empty()).then_some(selection.ids.as_slice());
        let selected = self.registry.discover(domain, ids)?;
        let Some(version) = &selection.up_to else {
            return Ok(selected);
        };
        let eligible = self.registry.discover_up_to(domain, version);
        Ok(selected
            .into_iter()
            .filter(|m| eligible.iter().any(|e| e.id() == m.id()))
            .collect())
    }

    /// Ensure a run exists for the migration and recover interrupted runs.
    fn prepare(&self, migration: &ResolvedMigration) -> Result<MigrationRun, MigrationError> {
        let run = match self.run_log.get(migration.id())? {
            None => self.run_log.upsert(&MigrationRun::pending(&migration.descriptor))?,
            Some(mut run) if run.status == RunStatus::Running => {
                tracing::warn!(id = migration.id(), "resetting migration interrupted while running");
                run.reset();
                self.run_log.upsert(&run)?
            }
            Some(run) => run,
        };
        Ok(run)
    }

    fn disposition(&self, migration: &ResolvedMigration) -> Disposition {
        if let Some(since) = &migration.deprecated_since {
            if self.config.engine_version >= *since {
                return Disposition::Deprecated;
            }
        }
        if migration.target < self.config.min_migration_version {
            return Disposition::Outdated;
        }
        Disposition::Execute
    }
}
