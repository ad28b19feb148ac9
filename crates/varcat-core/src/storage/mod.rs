//! Storage backend contract.
//!
//! A backend is a concrete genomic storage engine (document store, wide
//! column store, ...) reached through a host-supplied handle. The engine
//! never opens backend connections itself; it only talks to handles through
//! [`StorageBackend`] and interprets the raw answers through the adapter the
//! [`CompatResolver`](crate::compat::CompatResolver) picked for the backend
//! version.

mod snapshot;

pub use snapshot::SnapshotBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::EntityKind;

/// Get the current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Backend access errors.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend could not be reached.
    #[error("backend {backend} unavailable: {reason}")]
    Unavailable {
        /// Backend identifier.
        backend: String,
        /// Why it could not be reached.
        reason: String,
    },

    /// The backend answered with something the engine cannot interpret.
    #[error("backend {backend} returned malformed data: {reason}")]
    Malformed {
        /// Backend identifier.
        backend: String,
        /// What was wrong.
        reason: String,
    },
}

/// Per-entity status as reported by a backend, in its own vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntityStatus {
    /// Entity id, matching the catalog id.
    pub id: String,
    /// Entity kind.
    pub kind: EntityKind,
    /// Backend-native status code.
    pub code: String,
}

impl RawEntityStatus {
    /// Create a raw status record.
    pub fn new(id: impl Into<String>, kind: EntityKind, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            code: code.into(),
        }
    }
}

/// A node of the backend cluster with its backend-native state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    /// Node address or name.
    pub node: String,
    /// Backend-native node state.
    pub state: String,
}

/// Handle to a configured storage backend.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend identifier, e.g. `mongodb` or `hadoop`.
    fn backend_id(&self) -> &str;

    /// Backend runtime version as reported by the deployment.
    fn version(&self) -> &str;

    /// Authoritative per-entity status of a study.
    ///
    /// Returns `Ok(None)` when the study is not present in the backend at all.
    async fn study_status(&self, study: &str) -> Result<Option<Vec<RawEntityStatus>>, BackendError>;

    /// Cluster membership as reported by the backend.
    async fn cluster_members(&self) -> Result<Vec<ClusterMember>, BackendError>;
}
