//! Backend compatibility resolution.
//!
//! Storage backends change their metadata vocabulary, table layout and
//! cluster reporting between runtime versions. Instead of one code path per
//! version, the engine talks to a single [`BackendAdapter`] surface and a
//! small table maps `(backend id, version range)` to the adapter that speaks
//! that runtime's dialect.
//!
//! # Example
//!
//! ```ignore
//! let resolver = CompatResolver::with_default_adapters();
//! let adapter = resolver.resolve("hadoop", "3.2.1")?;
//! if adapter.supports(Feature::CohortStats) {
//!     // reconcile cohort statistics as well
//! }
//! ```

mod adapters;

pub use adapters::{ColumnAdapter, DocumentAdapter, LegacyColumnAdapter};

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use crate::catalog::EntityStatus;
use crate::storage::{ClusterMember, RawEntityStatus, StorageBackend};
use crate::version::{Version, VersionRange};

/// Optional backend capabilities probed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Per-sample secondary index status.
    SampleIndex,
    /// Cohort statistics status.
    CohortStats,
    /// File load status.
    FileIndex,
    /// Separate archive table per study.
    ArchiveTable,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::SampleIndex => write!(f, "sample_index"),
            Feature::CohortStats => write!(f, "cohort_stats"),
            Feature::FileIndex => write!(f, "file_index"),
            Feature::ArchiveTable => write!(f, "archive_table"),
        }
    }
}

/// Physical layout of a study inside a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    /// Table or collection holding variants.
    pub variants: String,
    /// Per-study archive table, if the backend keeps one.
    pub archive: Option<String>,
    /// Per-study sample index table, if the backend keeps one.
    pub sample_index: Option<String>,
}

/// Backend-agnostic capability surface.
pub trait BackendAdapter: Send + Sync + fmt::Debug {
    /// Adapter name, for logs.
    fn name(&self) -> &'static str;

    /// Probe an optional capability.
    fn supports(&self, feature: Feature) -> bool;

    /// Build the table descriptor for a study.
    fn table_descriptor(&self, study: &str) -> TableDescriptor;

    /// Filter cluster members down to the nodes able to serve requests.
    fn live_nodes(&self, members: &[ClusterMember]) -> Vec<String>;

    /// Translate a backend-native status code. `None` for unknown codes.
    fn interpret(&self, raw: &RawEntityStatus) -> Option<EntityStatus>;
}

/// Compatibility resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompatError {
    /// No adapter covers this backend at this version.
    #[error("unsupported backend version: {backend} {version}")]
    UnsupportedBackendVersion {
        /// Backend identifier.
        backend: String,
        /// Version reported by the backend.
        version: String,
    },
}

/// Constructor for an adapter.
pub type AdapterFactory = fn() -> Arc<dyn BackendAdapter>;

/// One row of the compatibility table.
#[derive(Clone)]
pub struct AdapterRule {
    /// Backend identifier the rule applies to.
    pub backend_id: String,
    /// Versions covered by the rule.
    pub range: VersionRange,
    /// Adapter constructor.
    pub factory: AdapterFactory,
}

impl AdapterRule {
    /// Create a rule.
    pub fn new(backend_id: impl Into<String>, range: VersionRange, factory: AdapterFactory) -> Self {
        Self {
            backend_id: backend_id.into(),
            range,
            factory,
        }
    }
}

impl fmt::Debug for AdapterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRule")
            .field("backend_id", &self.backend_id)
            .field("range", &self.range)
            .finish()
    }
}

/// Maps backend identity and version to an adapter.
///
/// Resolutions are cached, so each `(backend, version)` pair is resolved once
/// for the lifetime of the resolver; hosts build one resolver per process.
pub struct CompatResolver {
    rules: Vec<AdapterRule>,
    resolved: DashMap<(String, Version), Arc<dyn BackendAdapter>>,
}

impl CompatResolver {
    /// Create a resolver over an explicit rule table.
    pub fn new(rules: Vec<AdapterRule>) -> Self {
        Self {
            rules,
            resolved: DashMap::new(),
        }
    }

    /// Create a resolver with the built-in adapters.
    pub fn with_default_adapters() -> Self {
        Self::new(default_rules())
    }

    /// The rule table.
    pub fn rules(&self) -> &[AdapterRule] {
        &self.rules
    }

    /// Resolve the adapter for a backend id and version string.
    pub fn resolve(&self, backend_id: &str, version: &str) -> Result<Arc<dyn BackendAdapter>, CompatError> {
        let unsupported = || CompatError::UnsupportedBackendVersion {
            backend: backend_id.to_string(),
            version: version.to_string(),
        };
        let parsed = Version::parse(version).map_err(|_| unsupported())?;

        let key = (backend_id.to_string(), parsed);
        if let Some(adapter) = self.resolved.get(&key) {
            return Ok(Arc::clone(adapter.value()));
        }

        let rule = self
            .rules
            .iter()
            .find(|rule| rule.backend_id == backend_id && rule.range.contains(&parsed))
            .ok_or_else(unsupported)?;
        let adapter = (rule.factory)();
        tracing::debug!(
            backend = backend_id,
            version = %parsed,
            adapter = adapter.name(),
            "resolved backend adapter"
        );
        self.resolved.insert(key, Arc::clone(&adapter));
        Ok(adapter)
    }

    /// Resolve the adapter for a backend handle.
    pub fn resolve_backend(&self, backend: &dyn StorageBackend) -> Result<Arc<dyn BackendAdapter>, CompatError> {
        self.resolve(backend.backend_id(), backend.version())
    }
}

impl Default for CompatResolver {
    fn default() -> Self {
        Self::with_default_adapters()
    }
}

/// Built-in compatibility table.
pub fn default_rules() -> Vec<AdapterRule> {
    let ceiling = Version::new(99, 0, 0);
    vec![
        AdapterRule::new(
            "mongodb",
            VersionRange::new(Version::new(1, 0, 0), ceiling),
            DocumentAdapter::shared,
        ),
        AdapterRule::new(
            "hadoop",
            VersionRange::new(Version::new(1, 0, 0), Version::new(3, 0, 0)),
            LegacyColumnAdapter::shared,
        ),
        AdapterRule::new(
            "hadoop",
            VersionRange::new(Version::new(3, 0, 0), ceiling),
            ColumnAdapter::shared,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_version_range() {
        let resolver = CompatResolver::with_default_adapters();

        assert_eq!(resolver.resolve("hadoop", "2.7.3").unwrap().name(), "legacy-column");
        assert_eq!(resolver.resolve("hadoop", "3.0.0").unwrap().name(), "column");
        assert_eq!(resolver.resolve("mongodb", "6.0.4").unwrap().name(), "document");
    }

    #[test]
    fn test_unmatched_backend_fails_fast() {
        let resolver = CompatResolver::with_default_adapters();

        let err = resolver.resolve("cassandra", "4.0.0").unwrap_err();
        assert_eq!(
            err,
            CompatError::UnsupportedBackendVersion {
                backend: "cassandra".to_string(),
                version: "4.0.0".to_string(),
            }
        );
        assert!(resolver.resolve("hadoop", "0.9.0").is_err());
        assert!(resolver.resolve("hadoop", "not-a-version").is_err());
    }

    #[test]
    fn test_resolution_is_cached() {
        let resolver = CompatResolver::with_default_adapters();
        let first = resolver.resolve("hadoop", "3.2.0").unwrap();
        let second = resolver.resolve("hadoop", "3.2.0").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_custom_rule_table() {
        let resolver = CompatResolver::new(vec![AdapterRule::new(
            "hadoop",
            VersionRange::new(Version::new(2, 0, 0), Version::new(2, 1, 0)),
            LegacyColumnAdapter::shared,
        )]);
        assert!(resolver.resolve("hadoop", "2.0.5").is_ok());
        assert!(resolver.resolve("hadoop", "3.0.0").is_err());
        assert_eq!(resolver.rules().len(), 1);
    }
}
