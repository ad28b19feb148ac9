//! Migration descriptors and the manifest they are declared in.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::BoxError;
use crate::context::DomainContext;

/// Domain a migration operates on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Domain {
    /// Catalog metadata migrations.
    Catalog,
    /// Storage backend migrations.
    Storage,
}

impl Domain {
    /// Both domains, in the order they are run.
    pub const ALL: [Domain; 2] = [Domain::Catalog, Domain::Storage];
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Catalog => write!(f, "CATALOG"),
            Domain::Storage => write!(f, "STORAGE"),
        }
    }
}

/// Static description of one migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDescriptor {
    /// Globally unique id.
    pub id: String,
    /// Human readable description.
    pub description: String,
    /// Version the migration brings the data to, as declared.
    pub target_version: String,
    /// Domain the migration operates on.
    pub domain: Domain,
    /// Tie-break within a target version.
    pub rank: i32,
    /// Hotfix increment; bumped when a released migration is patched.
    pub patch: u32,
    /// Release date as `YYYYMMDD`.
    pub release_date: u32,
    /// Engine version from which the migration is no longer run.
    pub deprecated_since: Option<String>,
    /// Manual migrations only run when selected by id.
    pub manual: bool,
}

impl MigrationDescriptor {
    /// Create a descriptor with rank 0, patch 0, not deprecated and not manual.
    pub fn new(
        id: impl Into<String>,
        domain: Domain,
        target_version: impl Into<String>,
        release_date: u32,
    ) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            target_version: target_version.into(),
            domain,
            rank: 0,
            patch: 0,
            release_date,
            deprecated_since: None,
            manual: false,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the rank.
    pub fn with_rank(mut self, rank: i32) -> Self {
        self.rank = rank;
        self
    }

    /// Set the patch level.
    pub fn with_patch(mut self, patch: u32) -> Self {
        self.patch = patch;
        self
    }

    /// Deprecate the migration from the given engine version on.
    pub fn deprecated_since(mut self, version: impl Into<String>) -> Self {
        self.deprecated_since = Some(version.into());
        self
    }

    /// Require explicit selection.
    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }
}

/// Executable part of a migration.
#[async_trait]
pub trait MigrationBody: Send + Sync {
    /// Run the migration against the domain context.
    async fn run(&self, ctx: &DomainContext) -> Result<(), BoxError>;
}

/// A descriptor paired with its body.
#[derive(Clone)]
pub struct ManifestEntry {
    /// The descriptor.
    pub descriptor: MigrationDescriptor,
    /// The body.
    pub body: Arc<dyn MigrationBody>,
}

impl ManifestEntry {
    /// Create a manifest entry.
    pub fn new(descriptor: MigrationDescriptor, body: impl MigrationBody + 'static) -> Self {
        Self {
            descriptor,
            body: Arc::new(body),
        }
    }
}

impl fmt::Debug for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestEntry")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Source of the migration manifest.
pub trait MigrationProvider: Send + Sync {
    /// Every known migration, in any order.
    fn manifest(&self) -> Vec<ManifestEntry>;
}

impl MigrationProvider for Vec<ManifestEntry> {
    fn manifest(&self) -> Vec<ManifestEntry> {
        self.clone()
    }
}
