//! Migration-specific error types.

use thiserror::Error;

use crate::compat::CompatError;
use crate::version::{Version, VersionParseError};

/// Boxed error returned by migration bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The migration manifest is invalid. Raised before any body runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// Two manifest entries share an id.
    #[error("duplicate migration id: {id}")]
    DuplicateId {
        /// The duplicated id.
        id: String,
    },

    /// A version field does not parse.
    #[error("migration {id}: invalid {field}: {source}")]
    InvalidVersion {
        /// Migration id.
        id: String,
        /// Name of the offending field.
        field: &'static str,
        /// Parse failure.
        source: VersionParseError,
    },

    /// The release date is not a calendar date in `YYYYMMDD` form.
    #[error("migration {id}: invalid release date {date}, expected YYYYMMDD")]
    InvalidReleaseDate {
        /// Migration id.
        id: String,
        /// The rejected value.
        date: u32,
    },

    /// A selected id names no migration of the requested domain.
    #[error("unknown migration id: {id}")]
    UnknownId {
        /// The id that matched nothing.
        id: String,
    },
}

/// A migration targets a version older than the engine still supports.
///
/// The run is recorded as `SKIPPED_OUTDATED`; this error is what the operator
/// sees about it.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
#[error("migration {id} targets {target_version}, below the minimum supported version {min_version}; it must be applied with an older release")]
pub struct OutdatedMigrationError {
    /// Migration id.
    pub id: String,
    /// Version the migration targets.
    pub target_version: String,
    /// Minimum migration version supported by this engine.
    pub min_version: String,
}

impl OutdatedMigrationError {
    pub(crate) fn new(id: &str, target: &Version, min: &Version) -> Self {
        Self {
            id: id.to_string(),
            target_version: target.to_string(),
            min_version: min.to_string(),
        }
    }
}

/// Migration execution errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The manifest or the selection is invalid.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// A pending manual migration was not explicitly selected.
    #[error("migration {id} is manual and must be selected explicitly with --id {id}")]
    ManualMigrationRequired {
        /// Migration id.
        id: String,
    },

    /// A migration body returned an error.
    #[error("migration {id} failed: {message}")]
    Body {
        /// Migration id.
        id: String,
        /// Error reported by the body.
        message: String,
    },

    /// No adapter could be resolved for a configured backend.
    #[error(transparent)]
    Compat(#[from] CompatError),

    /// The host could not provide a context for the domain.
    #[error("cannot build {domain} context: {reason}")]
    Context {
        /// Domain whose context was requested.
        domain: String,
        /// Why it could not be built.
        reason: String,
    },

    /// Run log or catalog error.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::ManualMigrationRequired {
            id: "rebuild_sample_index".to_string(),
        };
        assert!(err.to_string().contains("--id rebuild_sample_index"));

        let err = OutdatedMigrationError::new("m1", &Version::new(1, 2, 0), &Version::new(2, 0, 0));
        assert!(err.to_string().contains("1.2.0"));
        assert!(err.to_string().contains("2.0.0"));
    }
}
