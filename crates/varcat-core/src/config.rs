//! Engine configuration.
//!
//! Every knob here is supplied by the host (CLI flags, a service config);
//! the engine never reads configuration on its own.

use std::time::Duration;

use crate::version::Version;

/// Default number of studies reconciled concurrently.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Default per-study reconciliation timeout in seconds.
pub const DEFAULT_STUDY_TIMEOUT_SECS: u64 = 300;

/// Default number of compare-and-set retries per divergent entity.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Access mode of the configured storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Backends accept writes; STORAGE migrations may run.
    #[default]
    ReadWrite,
    /// Backends are read-only; STORAGE migrations are deferred.
    ReadOnly,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::ReadWrite => write!(f, "read_write"),
            StorageMode::ReadOnly => write!(f, "read_only"),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Version of the running engine, compared against `deprecated_since`.
    pub engine_version: Version,

    /// Migrations targeting a version below this floor are outdated.
    pub min_migration_version: Version,

    /// Size of the reconciliation worker pool.
    pub worker_pool_size: usize,

    /// Timeout applied to each study during reconciliation.
    pub study_timeout: Duration,

    /// Compare-and-set retries per divergent entity before it is reported
    /// as unresolved.
    pub max_conflict_retries: u32,

    /// Storage access mode.
    pub storage_mode: StorageMode,
}

impl EngineConfig {
    /// Create a configuration for the given engine version and migration floor.
    pub fn new(engine_version: Version, min_migration_version: Version) -> Self {
        Self {
            engine_version,
            min_migration_version,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            study_timeout: Duration::from_secs(DEFAULT_STUDY_TIMEOUT_SECS),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            storage_mode: StorageMode::ReadWrite,
        }
    }

    /// Set the reconciliation worker pool size.
    pub fn with_worker_pool_size(mut self, workers: usize) -> Self {
        self.worker_pool_size = workers.max(1);
        self
    }

    /// Set the per-study timeout.
    pub fn with_study_timeout(mut self, timeout: Duration) -> Self {
        self.study_timeout = timeout;
        self
    }

    /// Set the conflict retry budget.
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Set the storage access mode.
    pub fn with_storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = mode;
        self
    }

    /// Check if storage writes are disabled.
    pub fn is_storage_read_only(&self) -> bool {
        self.storage_mode == StorageMode::ReadOnly
    }
}
