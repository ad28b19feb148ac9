//! Command implementations.
//!
//! Each command returns the process exit code on completion; errors that
//! abort a command are returned as [`CliError`] and mapped by `main`.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use varcat_core::migration::MigrationSelection;
use varcat_core::{
    BatchReport, CancelHandle, CatalogEntity, CatalogStore, CompatResolver, Domain, EngineConfig,
    MigrationError, MigrationExecutor, MigrationRegistry, ReconciliationEngine, SledCatalog,
    SledRunLog, SledSyncStateStore, SnapshotBackend, StaticContextProvider, StudyRef, SyncError,
};

use crate::config::{parse_version, SyncArgs, Topology};
use crate::error::{CliError, EXIT_INCOMPLETE};
use crate::formatter::Formatter;
use crate::manifest;

/// Exit code for a command that completed everything it was asked to.
pub const EXIT_OK: u8 = 0;

/// Stores and backends a command runs against.
pub struct Workspace {
    db: sled::Db,
    catalog: Arc<SledCatalog>,
    run_log: Arc<SledRunLog>,
    sync_store: Arc<SledSyncStateStore>,
    contexts: Arc<StaticContextProvider>,
    config: EngineConfig,
}

impl Workspace {
    /// Open the catalog database and wire the configured backends.
    pub fn open(
        data_path: &Path,
        topology: Option<&Path>,
        config: EngineConfig,
    ) -> Result<Self, CliError> {
        let db = sled::open(data_path)?;
        let catalog = Arc::new(SledCatalog::open(&db)?);
        let run_log = Arc::new(SledRunLog::open(&db)?);
        let sync_store = Arc::new(SledSyncStateStore::open(&db)?);

        let topology = match topology {
            Some(path) => Topology::load(path)?,
            None => Topology::default(),
        };
        let mut contexts = StaticContextProvider::new(
            catalog.clone(),
            Arc::new(CompatResolver::with_default_adapters()),
        );
        for (project, backend) in topology.projects {
            tracing::debug!(
                project = %project,
                backend = %backend.backend,
                version = %backend.version,
                snapshot = %backend.snapshot.display(),
                "backend configured"
            );
            contexts = contexts.with_backend(
                project,
                Arc::new(SnapshotBackend::new(
                    backend.backend,
                    backend.version,
                    backend.snapshot,
                )),
            );
        }

        Ok(Self {
            db,
            catalog,
            run_log,
            sync_store,
            contexts: Arc::new(contexts),
            config,
        })
    }

    fn engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::new(self.sync_store.clone(), self.config.clone())
    }

    fn executor(&self) -> Result<MigrationExecutor, CliError> {
        let registry =
            MigrationRegistry::load(&manifest::builtin(self.engine())).map_err(MigrationError::from)?;
        Ok(MigrationExecutor::new(
            Arc::new(registry),
            self.run_log.clone(),
            self.contexts.clone(),
            self.config.clone(),
        ))
    }

    /// Flush every store to disk.
    pub async fn flush(&self) -> Result<(), CliError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

/// `migrate run`.
pub async fn migrate_run(
    workspace: &Workspace,
    domain: Domain,
    version: Option<&str>,
    ids: Vec<String>,
    formatter: &dyn Formatter,
) -> Result<u8, CliError> {
    let selection = MigrationSelection {
        up_to: version.map(|v| parse_version("--version", v)).transpose()?,
        ids,
    };

    let report = workspace.executor()?.run(domain, &selection).await?;
    for outdated in &report.outdated {
        eprintln!("warning: {}", outdated);
    }
    println!("{}", formatter.format_run_report(&report));

    Ok(if report.is_success() {
        EXIT_OK
    } else {
        EXIT_INCOMPLETE
    })
}

/// `migrate status`.
pub fn migrate_status(
    workspace: &Workspace,
    domain: Option<Domain>,
    formatter: &dyn Formatter,
) -> Result<u8, CliError> {
    let status = workspace.executor()?.status(domain)?;
    println!("{}", formatter.format_status(&status));
    Ok(EXIT_OK)
}

/// `sync-storage`.
pub async fn sync_storage(
    workspace: &Workspace,
    target: &SyncArgs,
    cancel: &CancelHandle,
    formatter: &dyn Formatter,
) -> Result<u8, CliError> {
    let report = reconcile(workspace, target, cancel).await?;
    println!("{}", formatter.format_batch(&report));
    Ok(if report.all_synchronized() {
        EXIT_OK
    } else {
        EXIT_INCOMPLETE
    })
}

async fn reconcile(
    workspace: &Workspace,
    target: &SyncArgs,
    cancel: &CancelHandle,
) -> Result<BatchReport, CliError> {
    let ctx = workspace.contexts.storage_context();
    let studies = match (&target.study, &target.project) {
        (Some(study), _) => {
            let study = StudyRef::parse(study)?;
            match workspace.catalog.study(&study.fqn)? {
                Some(registered) => vec![registered],
                None => return Err(SyncError::UnknownStudy { study: study.fqn }.into()),
            }
        }
        (None, Some(project)) => workspace.catalog.list_studies(Some(project.as_str()))?,
        (None, None) => workspace.catalog.list_studies(None)?,
    };
    Ok(workspace.engine().reconcile_batch(&ctx, studies, cancel).await)
}

/// Catalog import document.
///
/// ```json
/// {
///   "studies": [
///     {
///       "study": "grch38:cancer",
///       "entities": [{ "id": "S1", "kind": "sample", "status": "ready" }]
///     }
///   ]
/// }
/// ```
#[derive(Debug, Deserialize)]
struct ImportDocument {
    #[serde(default)]
    studies: Vec<ImportStudy>,
}

#[derive(Debug, Deserialize)]
struct ImportStudy {
    study: String,
    #[serde(default)]
    entities: Vec<CatalogEntity>,
}

/// `catalog import`.
pub fn catalog_import(
    workspace: &Workspace,
    file: &Path,
    formatter: &dyn Formatter,
) -> Result<u8, CliError> {
    let bytes = std::fs::read(file).map_err(|e| CliError::Input {
        path: file.to_path_buf(),
        reason: e.to_string(),
    })?;
    let document: ImportDocument = serde_json::from_slice(&bytes).map_err(|e| CliError::Input {
        path: file.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut entities = 0;
    for study in &document.studies {
        let study_ref = StudyRef::parse(&study.study)?;
        workspace.catalog.register_study(&study_ref)?;
        for entity in &study.entities {
            workspace.catalog.put_entity(&study_ref.fqn, entity)?;
        }
        entities += study.entities.len();
        tracing::info!(study = %study_ref, entities = study.entities.len(), "study imported");
    }
    workspace.catalog.flush()?;

    println!("{}", formatter.format_import(document.studies.len(), entities));
    Ok(EXIT_OK)
}
