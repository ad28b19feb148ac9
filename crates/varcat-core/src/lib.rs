//! varcat core - migration execution and catalog/storage reconciliation.
//!
//! This crate keeps a variant catalog consistent with the storage backends
//! that hold the actual genomic data:
//!
//! - [`migration`] runs versioned, forward-only migrations per domain.
//! - [`sync`] reconciles cached catalog status with authoritative storage
//!   status, study by study.
//! - [`compat`] maps backend versions to the adapter speaking their dialect.
//! - [`context`] carries the catalog and backend handles both of them use.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
mod codec;
pub mod compat;
pub mod config;
pub mod context;
pub mod error;
pub mod migration;
pub mod storage;
pub mod sync;
pub mod version;

pub use catalog::{CasOutcome, CatalogEntity, CatalogStore, EntityKind, EntityStatus, SledCatalog, StudyRef};
pub use compat::{BackendAdapter, CompatError, CompatResolver, Feature};
pub use config::{EngineConfig, StorageMode};
pub use context::{ContextProvider, DomainContext, StaticContextProvider, StorageContext};
pub use error::Error;
pub use migration::{
    DescriptorError, Domain, ManifestEntry, MigrationBody, MigrationDescriptor, MigrationError,
    MigrationExecutor, MigrationRegistry, MigrationRun, MigrationSelection, RunStatus, SledRunLog,
};
pub use storage::{BackendError, SnapshotBackend, StorageBackend};
pub use sync::{
    BatchReport, CancelHandle, ReconciliationEngine, SledSyncStateStore, SyncError, SyncStatus,
};
pub use version::{Version, VersionRange};
