//! Backend handle reading authoritative status from a JSON snapshot.
//!
//! Storage deployments export their metadata as a snapshot document:
//!
//! ```json
//! {
//!   "nodes": [{ "node": "hb-1", "state": "ONLINE" }],
//!   "studies": {
//!     "grch38:cancer": [{ "id": "S1", "kind": "sample", "code": "INDEXED" }]
//!   }
//! }
//! ```
//!
//! The file is re-read on every call so a fresh export is picked up without
//! restarting. A missing or unreadable file means the backend is unreachable.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use super::{BackendError, ClusterMember, RawEntityStatus, StorageBackend};

#[derive(Debug, Default, Deserialize)]
struct SnapshotDocument {
    #[serde(default)]
    nodes: Vec<ClusterMember>,
    #[serde(default)]
    studies: HashMap<String, Vec<RawEntityStatus>>,
}

/// Storage backend backed by a metadata snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotBackend {
    backend_id: String,
    version: String,
    path: PathBuf,
}

impl SnapshotBackend {
    /// Create a handle for the given backend identity and snapshot path.
    pub fn new(
        backend_id: impl Into<String>,
        version: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            version: version.into(),
            path: path.into(),
        }
    }

    async fn load(&self) -> Result<SnapshotDocument, BackendError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| BackendError::Unavailable {
                backend: self.backend_id.clone(),
                reason: format!("{}: {}", self.path.display(), e),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Malformed {
            backend: self.backend_id.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl StorageBackend for SnapshotBackend {
    fn backend_id(&self) -> &str {
        &self.backend_id
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn study_status(&self, study: &str) -> Result<Option<Vec<RawEntityStatus>>, BackendError> {
        let mut document = self.load().await?;
        Ok(document.studies.remove(study))
    }

    async fn cluster_members(&self) -> Result<Vec<ClusterMember>, BackendError> {
        Ok(self.load().await?.nodes)
    }
}
