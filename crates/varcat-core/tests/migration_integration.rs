//! Integration tests for migration discovery and execution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use varcat_core::catalog::{CatalogEntity, CatalogStore, EntityKind, EntityStatus, SledCatalog, StudyRef};
use varcat_core::compat::CompatResolver;
use varcat_core::config::EngineConfig;
use varcat_core::context::{DomainContext, StaticContextProvider};
use varcat_core::migration::{
    BoxError, DescriptorError, Domain, ManifestEntry, MigrationBody, MigrationDescriptor,
    MigrationError, MigrationExecutor, MigrationRegistry, MigrationRun, MigrationSelection, RunLog,
    RunStatus, SledRunLog,
};
use varcat_core::storage::SnapshotBackend;
use varcat_core::sync::{CancelHandle, ReconciliationEngine, SledSyncStateStore, SyncStatus};
use varcat_core::version::Version;

/// Body that records its invocations and optionally fails.
struct Recording {
    id: String,
    log: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

#[async_trait]
impl MigrationBody for Recording {
    async fn run(&self, _ctx: &DomainContext) -> Result<(), BoxError> {
        self.log.lock().unwrap().push(self.id.clone());
        if self.fail {
            return Err(format!("{} exploded", self.id).into());
        }
        Ok(())
    }
}

struct TestContext {
    db: sled::Db,
    catalog: Arc<SledCatalog>,
    log: Arc<Mutex<Vec<String>>>,
    snapshot_dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let catalog = Arc::new(SledCatalog::open(&db).unwrap());
        Self {
            db,
            catalog,
            log: Arc::new(Mutex::new(Vec::new())),
            snapshot_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn entry(&self, descriptor: MigrationDescriptor, fail: bool) -> ManifestEntry {
        let id = descriptor.id.clone();
        ManifestEntry::new(
            descriptor,
            Recording {
                id,
                log: Arc::clone(&self.log),
                fail,
            },
        )
    }

    fn run_log(&self) -> Arc<SledRunLog> {
        Arc::new(SledRunLog::open(&self.db).unwrap())
    }

    fn provider(&self) -> StaticContextProvider {
        StaticContextProvider::new(
            self.catalog.clone() as Arc<dyn CatalogStore>,
            Arc::new(CompatResolver::with_default_adapters()),
        )
    }

    fn executor(&self, manifest: Vec<ManifestEntry>, engine_version: Version) -> MigrationExecutor {
        let registry = MigrationRegistry::load(&manifest).unwrap();
        MigrationExecutor::new(
            Arc::new(registry),
            self.run_log(),
            Arc::new(self.provider()),
            EngineConfig::new(engine_version, Version::new(1, 0, 0)),
        )
    }

    fn invoked(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

fn catalog(id: &str, target: &str) -> MigrationDescriptor {
    MigrationDescriptor::new(id, Domain::Catalog, target, 20240601)
}

#[tokio::test]
async fn test_execution_follows_ordering_key() {
    let ctx = TestContext::new();
    let executor = ctx.executor(
        vec![
            ctx.entry(catalog("m1", "1.2.0").with_rank(1), false),
            ctx.entry(catalog("m2", "1.10.0"), false),
            ctx.entry(catalog("m3", "1.2.0"), false),
        ],
        Version::new(2, 0, 0),
    );

    executor.run(Domain::Catalog, &MigrationSelection::all()).await.unwrap();
    assert_eq!(ctx.invoked(), vec!["m3", "m1", "m2"]);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let ctx = TestContext::new();
    let manifest = vec![
        ctx.entry(catalog("a", "1.0.0"), false),
        ctx.entry(catalog("b", "1.1.0"), false),
    ];
    let executor = ctx.executor(manifest, Version::new(2, 0, 0));

    let first = executor.run(Domain::Catalog, &MigrationSelection::all()).await.unwrap();
    let second = executor.run(Domain::Catalog, &MigrationSelection::all()).await.unwrap();

    assert!(first.is_success());
    assert!(second.is_success());
    assert_eq!(ctx.invoked(), vec!["a", "b"]);
    assert_eq!(second.count(RunStatus::Completed), 2);
    for run in &second.runs {
        assert_eq!(run.attempts, 1);
    }
}

#[tokio::test]
async fn test_deprecation_boundary() {
    let at_boundary = TestContext::new();
    let executor = at_boundary.executor(
        vec![at_boundary.entry(catalog("legacy", "1.5.0").deprecated_since("2.0.0"), false)],
        Version::new(2, 0, 0),
    );
    let report = executor.run(Domain::Catalog, &MigrationSelection::all()).await.unwrap();
    assert_eq!(report.runs[0].status, RunStatus::SkippedDeprecated);
    assert!(at_boundary.invoked().is_empty());

    let below = TestContext::new();
    let executor = below.executor(
        vec![below.entry(catalog("legacy", "1.5.0").deprecated_since("2.0.0"), false)],
        Version::new(1, 9, 9),
    );
    let report = executor.run(Domain::Catalog, &MigrationSelection::all()).await.unwrap();
    assert_eq!(report.runs[0].status, RunStatus::Completed);
    assert_eq!(below.invoked(), vec!["legacy"]);
}

#[tokio::test]
async fn test_failure_halts_domain() {
    let ctx = TestContext::new();
    let executor = ctx.executor(
        vec![
            ctx.entry(catalog("A", "1.0.0"), false),
            ctx.entry(catalog("B", "1.1.0"), true),
            ctx.entry(catalog("C", "1.2.0"), false),
        ],
        Version::new(2, 0, 0),
    );

    let report = executor.run(Domain::Catalog, &MigrationSelection::all()).await.unwrap();
    let statuses: Vec<_> = report.runs.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![RunStatus::Completed, RunStatus::Failed, RunStatus::Pending]
    );
    assert!(!report.is_success());
    assert_eq!(ctx.invoked(), vec!["A", "B"]);

    let failed = ctx.run_log().get("B").unwrap().unwrap();
    assert_eq!(failed.error.as_deref(), Some("migration B failed: B exploded"));
    assert!(failed.finished_at.is_some());
}

#[tokio::test]
async fn test_interrupted_run_is_recovered() {
    let ctx = TestContext::new();
    let descriptor = catalog("crashed", "1.0.0");

    // Simulate a crash after RUNNING was persisted.
    let log = ctx.run_log();
    let mut run = log.upsert(&MigrationRun::pending(&descriptor)).unwrap();
    run.start(0);
    log.upsert(&run).unwrap();

    let executor = ctx.executor(vec![ctx.entry(descriptor, false)], Version::new(2, 0, 0));
    let report = executor.run(Domain::Catalog, &MigrationSelection::all()).await.unwrap();

    assert_eq!(report.runs[0].status, RunStatus::Completed);
    assert_eq!(report.runs[0].attempts, 2);
    assert_eq!(ctx.invoked(), vec!["crashed"]);
}

#[tokio::test]
async fn test_unknown_id_is_rejected_before_running() {
    let ctx = TestContext::new();
    let executor = ctx.executor(vec![ctx.entry(catalog("a", "1.0.0"), false)], Version::new(2, 0, 0));

    let err = executor
        .run(Domain::Catalog, &MigrationSelection::ids(["a", "nope"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Descriptor(DescriptorError::UnknownId { ref id }) if id == "nope"
    ));
    assert!(ctx.invoked().is_empty());
    assert!(ctx.run_log().list(None).unwrap().is_empty());
}

/// STORAGE migration whose body reconciles every study.
struct ReconcileAll {
    engine: ReconciliationEngine,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl MigrationBody for ReconcileAll {
    async fn run(&self, ctx: &DomainContext) -> Result<(), BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let storage = ctx.storage().ok_or("storage context required")?;
        let report = self.engine.reconcile_all(storage, &CancelHandle::new()).await?;
        if report.all_synchronized() {
            Ok(())
        } else {
            Err(format!("{} studies not synchronized", report.outcomes.len() - report.count(SyncStatus::Synchronized)).into())
        }
    }
}

#[tokio::test]
async fn test_storage_migration_reconciles_catalog() {
    let ctx = TestContext::new();
    let study = StudyRef::parse("grch38:cancer").unwrap();
    ctx.catalog.register_study(&study).unwrap();
    ctx.catalog
        .put_entity(&study.fqn, &CatalogEntity::new("S1", EntityKind::Sample, EntityStatus::None))
        .unwrap();

    let snapshot = ctx.snapshot_dir.path().join("hadoop.json");
    std::fs::write(
        &snapshot,
        r#"{
            "nodes": [{ "node": "hb-1", "state": "ONLINE" }],
            "studies": { "grch38:cancer": [{ "id": "S1", "kind": "sample", "code": "INDEXED" }] }
        }"#,
    )
    .unwrap();

    let config = EngineConfig::new(Version::new(2, 0, 0), Version::new(1, 0, 0));
    let engine = ReconciliationEngine::new(
        Arc::new(SledSyncStateStore::open(&ctx.db).unwrap()),
        config.clone(),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let manifest = vec![ManifestEntry::new(
        MigrationDescriptor::new("sync_storage", Domain::Storage, "2.0.0", 20240601),
        ReconcileAll {
            engine: engine.clone(),
            calls: Arc::clone(&calls),
        },
    )];
    let provider = ctx
        .provider()
        .with_backend("grch38", Arc::new(SnapshotBackend::new("hadoop", "3.1.0", &snapshot)));
    let executor = MigrationExecutor::new(
        Arc::new(MigrationRegistry::load(&manifest).unwrap()),
        ctx.run_log(),
        Arc::new(provider),
        config,
    );

    let report = executor.run(Domain::Storage, &MigrationSelection::all()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let entity = ctx.catalog.entity("grch38:cancer", "S1").unwrap().unwrap();
    assert_eq!(entity.status, EntityStatus::Ready);
    let state = engine.store().get("grch38:cancer").unwrap().unwrap();
    assert_eq!(state.status, SyncStatus::Synchronized);
}

#[tokio::test]
async fn test_storage_migration_fails_on_unsupported_backend() {
    let ctx = TestContext::new();
    ctx.catalog
        .register_study(&StudyRef::parse("grch38:cancer").unwrap())
        .unwrap();

    let config = EngineConfig::new(Version::new(2, 0, 0), Version::new(1, 0, 0));
    let engine = ReconciliationEngine::new(
        Arc::new(SledSyncStateStore::open(&ctx.db).unwrap()),
        config.clone(),
    );
    let manifest = vec![
        ManifestEntry::new(
            MigrationDescriptor::new("sync_storage", Domain::Storage, "2.0.0", 20240601),
            ReconcileAll {
                engine: engine.clone(),
                calls: Arc::new(AtomicUsize::new(0)),
            },
        ),
        ctx.entry(MigrationDescriptor::new("after", Domain::Storage, "2.1.0", 20240601), false),
    ];
    let provider = ctx
        .provider()
        .with_backend("grch38", Arc::new(SnapshotBackend::new("hadoop", "0.20.0", "/nonexistent")));
    let executor = MigrationExecutor::new(
        Arc::new(MigrationRegistry::load(&manifest).unwrap()),
        ctx.run_log(),
        Arc::new(provider),
        config,
    );

    let report = executor.run(Domain::Storage, &MigrationSelection::all()).await.unwrap();
    assert_eq!(report.runs[0].status, RunStatus::Failed);
    assert_eq!(report.runs[1].status, RunStatus::Pending);

    let state = engine.store().get("grch38:cancer").unwrap().unwrap();
    assert_eq!(state.status, SyncStatus::Unknown);
    assert!(state.last_error.unwrap().contains("unsupported backend version"));
}
