//! Catalog/storage reconciliation.
//!
//! The catalog caches per-entity status (sample indexes, cohort statistics,
//! loaded files) that storage backends own. These drift when jobs fail
//! half-way or storage is restored from a backup. The
//! [`ReconciliationEngine`] re-derives the cached status from the backend,
//! study by study, and records the verdict in a [`SyncStateStore`].

pub mod diff;
pub mod engine;
pub mod error;
pub mod state;

pub use diff::{Divergence, DivergentEntity};
pub use engine::{BatchReport, CancelHandle, ReconciliationEngine, StudyOutcome};
pub use error::SyncError;
pub use state::{SledSyncStateStore, StudySyncState, SyncStateStore, SyncStatus};
