//! Catalog contract.
//!
//! The catalog caches per-entity indexing and statistics status for each
//! study. It is the source of truth for logical facts (which entities exist,
//! which are soft-deleted) but only a cache for physically stored facts,
//! which the storage backends own.

mod catalog;

pub use catalog::SledCatalog;

use std::fmt;

use crate::error::Error;

/// Kind of catalog entity whose status is mirrored from storage.
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
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Sample index status.
    Sample,
    /// Cohort statistics status.
    Cohort,
    /// File load status.
    File,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Sample => write!(f, "sample"),
            EntityKind::Cohort => write!(f, "cohort"),
            EntityKind::File => write!(f, "file"),
        }
    }
}

/// Backend-agnostic entity status.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Nothing stored for this entity.
    None,
    /// An indexing or statistics job is in flight.
    Running,
    /// Stored and usable.
    Ready,
    /// Stored but stale or broken.
    Invalid,
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityStatus::None => write!(f, "none"),
            EntityStatus::Running => write!(f, "running"),
            EntityStatus::Ready => write!(f, "ready"),
            EntityStatus::Invalid => write!(f, "invalid"),
        }
    }
}

/// Cached status of one entity as recorded in the catalog.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct CatalogEntity {
    /// Entity id, unique within its study.
    pub id: String,
    /// Entity kind.
    pub kind: EntityKind,
    /// Cached status.
    pub status: EntityStatus,
    /// Compare-and-set counter, bumped on every status write.
    #[serde(default)]
    pub version: u64,
    /// Soft-deletion flag. Deleted entities are never rewritten.
    #[serde(default)]
    pub deleted: bool,
}

impl CatalogEntity {
    /// Create a live entity at version 0.
    pub fn new(id: impl Into<String>, kind: EntityKind, status: EntityStatus) -> Self {
        Self {
            id: id.into(),
            kind,
            status,
            version: 0,
            deleted: false,
        }
    }

    /// Mark the entity as soft-deleted.
    pub fn soft_deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

/// Reference to a study by fully qualified name.
///
/// The fully qualified name has the form `[organization@]project:study`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StudyRef {
    /// Fully qualified study name.
    pub fqn: String,
    /// Owning project id.
    pub project: String,
}

impl StudyRef {
    /// Parse a fully qualified study name.
    pub fn parse(fqn: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidData(format!("invalid study name '{fqn}': expected [org@]project:study"));
        let (scope, study) = fqn.split_once(':').ok_or_else(invalid)?;
        let project = scope.rsplit_once('@').map_or(scope, |(_, project)| project);
        if project.is_empty() || study.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            fqn: fqn.to_string(),
            project: project.to_string(),
        })
    }
}

impl fmt::Display for StudyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fqn)
    }
}

/// Outcome of a conditional status write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed; the entity is now at `version`.
    Applied {
        /// New version of the entity.
        version: u64,
    },
    /// The stored version did not match the expected one.
    Conflict,
}

/// Catalog access used by migration bodies and the reconciliation engine.
pub trait CatalogStore: Send + Sync {
    /// List studies, optionally restricted to one project.
    fn list_studies(&self, project: Option<&str>) -> Result<Vec<StudyRef>, Error>;

    /// Look up a registered study by fully qualified name.
    fn study(&self, fqn: &str) -> Result<Option<StudyRef>, Error> {
        Ok(self
            .list_studies(None)?
            .into_iter()
            .find(|study| study.fqn == fqn))
    }

    /// All entities of a study, including soft-deleted ones.
    fn entities(&self, study: &str) -> Result<Vec<CatalogEntity>, Error>;

    /// Fetch a single entity.
    fn entity(&self, study: &str, id: &str) -> Result<Option<CatalogEntity>, Error>;

    /// Set the status of an entity if its version still equals
    /// `expected_version`.
    fn compare_and_set_status(
        &self,
        study: &str,
        id: &str,
        expected_version: u64,
        status: EntityStatus,
    ) -> Result<CasOutcome, Error>;
}
