//! Migrations shipped with the `varcat` binary.

use async_trait::async_trait;

use varcat_core::migration::BoxError;
use varcat_core::{
    CancelHandle, CasOutcome, DomainContext, EntityStatus, ManifestEntry, MigrationBody,
    MigrationDescriptor, Domain, ReconciliationEngine, SyncStatus,
};

/// Build the manifest of built-in migrations.
pub fn builtin(engine: ReconciliationEngine) -> Vec<ManifestEntry> {
    vec![
        ManifestEntry::new(
            MigrationDescriptor::new(
                "invalidate_deleted_running_entities",
                Domain::Catalog,
                "3.0.0",
                20240610,
            )
            .with_description(
                "Mark soft-deleted entities left RUNNING by an interrupted job as INVALID",
            ),
            InvalidateDeletedRunning,
        ),
        ManifestEntry::new(
            MigrationDescriptor::new("sync_storage_status", Domain::Storage, "3.0.0", 20240620)
                .with_description("Re-derive cached entity status from every storage backend"),
            SyncStorageStatus { engine },
        ),
    ]
}

/// Reconciliation skips soft-deleted entities, so a job interrupted after
/// the entity was deleted leaves it RUNNING forever.
struct InvalidateDeletedRunning;

#[async_trait]
impl MigrationBody for InvalidateDeletedRunning {
    async fn run(&self, ctx: &DomainContext) -> Result<(), BoxError> {
        let catalog = ctx.catalog();
        let mut updated = 0;
        for study in catalog.list_studies(None)? {
            for entity in catalog.entities(&study.fqn)? {
                if !entity.deleted || entity.status != EntityStatus::Running {
                    continue;
                }
                match catalog.compare_and_set_status(
                    &study.fqn,
                    &entity.id,
                    entity.version,
                    EntityStatus::Invalid,
                )? {
                    CasOutcome::Applied { .. } => updated += 1,
                    CasOutcome::Conflict => {
                        return Err(format!(
                            "entity {} of {} changed while migrating",
                            entity.id, study
                        )
                        .into())
                    }
                }
            }
        }
        tracing::info!(updated, "invalidated deleted running entities");
        Ok(())
    }
}

struct SyncStorageStatus {
    engine: ReconciliationEngine,
}

#[async_trait]
impl MigrationBody for SyncStorageStatus {
    async fn run(&self, ctx: &DomainContext) -> Result<(), BoxError> {
        let storage = ctx
            .storage()
            .ok_or("sync_storage_status requires a storage context")?;
        let report = self.engine.reconcile_all(storage, &CancelHandle::new()).await?;

        let unknown: Vec<&str> = report
            .outcomes
            .iter()
            .filter(|outcome| outcome.status == SyncStatus::Unknown)
            .map(|outcome| outcome.study.as_str())
            .collect();
        if !unknown.is_empty() {
            return Err(format!("no verdict for studies: {}", unknown.join(", ")).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use varcat_core::sync::SyncStateStore;
    use varcat_core::{
        CatalogEntity, CatalogStore, CompatResolver, ContextProvider, EngineConfig, EntityKind,
        MigrationRegistry, SledCatalog, SledSyncStateStore, SnapshotBackend,
        StaticContextProvider, StudyRef, Version,
    };

    struct Fixture {
        _dir: tempfile::TempDir,
        snapshot: std::path::PathBuf,
        catalog: Arc<SledCatalog>,
        store: Arc<SledSyncStateStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::Config::new().temporary(true).open().unwrap();
        let catalog = Arc::new(SledCatalog::open(&db).unwrap());
        let store = Arc::new(SledSyncStateStore::open(&db).unwrap());

        let study = StudyRef::parse("grch38:cancer").unwrap();
        catalog.register_study(&study).unwrap();
        catalog
            .put_entity(
                &study.fqn,
                &CatalogEntity::new("S1", EntityKind::Sample, EntityStatus::None),
            )
            .unwrap();
        catalog
            .put_entity(
                &study.fqn,
                &CatalogEntity::new("S2", EntityKind::Sample, EntityStatus::Running).soft_deleted(),
            )
            .unwrap();

        Fixture {
            snapshot: dir.path().join("grch38.json"),
            _dir: dir,
            catalog,
            store,
        }
    }

    fn engine(store: Arc<SledSyncStateStore>) -> ReconciliationEngine {
        ReconciliationEngine::new(
            store,
            EngineConfig::new(Version::new(3, 0, 0), Version::new(2, 0, 0)),
        )
    }

    fn provider(fx: &Fixture) -> StaticContextProvider {
        StaticContextProvider::new(fx.catalog.clone(), Arc::new(CompatResolver::default()))
            .with_backend(
                "grch38",
                Arc::new(SnapshotBackend::new("hadoop", "3.1.0", &fx.snapshot)),
            )
    }

    #[test]
    fn test_builtin_manifest_is_valid() {
        let fx = fixture();
        let registry = MigrationRegistry::load(&builtin(engine(fx.store.clone()))).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.discover(Domain::Catalog, None).unwrap().len(), 1);
        assert_eq!(registry.discover(Domain::Storage, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_deleted_running() {
        let fx = fixture();
        let ctx = provider(&fx).context(Domain::Catalog).unwrap();

        InvalidateDeletedRunning.run(&ctx).await.unwrap();

        let deleted = fx.catalog.entity("grch38:cancer", "S2").unwrap().unwrap();
        assert_eq!(deleted.status, EntityStatus::Invalid);
        let live = fx.catalog.entity("grch38:cancer", "S1").unwrap().unwrap();
        assert_eq!(live.status, EntityStatus::None);

        // Nothing left to do the second time.
        InvalidateDeletedRunning.run(&ctx).await.unwrap();
        let deleted = fx.catalog.entity("grch38:cancer", "S2").unwrap().unwrap();
        assert_eq!(deleted.version, 1);
    }

    #[tokio::test]
    async fn test_sync_storage_status_reconciles() {
        let fx = fixture();
        std::fs::write(
            &fx.snapshot,
            r#"{
                "nodes": [{ "node": "hb-1", "state": "ONLINE" }],
                "studies": { "grch38:cancer": [{ "id": "S1", "kind": "sample", "code": "INDEXED" }] }
            }"#,
        )
        .unwrap();
        let ctx = provider(&fx).context(Domain::Storage).unwrap();

        let body = SyncStorageStatus {
            engine: engine(fx.store.clone()),
        };
        body.run(&ctx).await.unwrap();

        let entity = fx.catalog.entity("grch38:cancer", "S1").unwrap().unwrap();
        assert_eq!(entity.status, EntityStatus::Ready);
        let state = fx.store.get("grch38:cancer").unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Synchronized);
    }

    #[tokio::test]
    async fn test_sync_storage_status_fails_without_verdict() {
        let fx = fixture();
        // No snapshot written: the backend is unreachable.
        let ctx = provider(&fx).context(Domain::Storage).unwrap();

        let body = SyncStorageStatus {
            engine: engine(fx.store.clone()),
        };
        let err = body.run(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("grch38:cancer"));
    }
}
