//! Reconciliation errors.

use thiserror::Error;

use crate::compat::CompatError;
use crate::storage::BackendError;

/// Errors that stop the reconciliation of one study.
///
/// None of these abort a batch: the study is recorded as UNKNOWN with the
/// error message and the batch moves on.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The backend could not be queried.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// No adapter covers the project's backend version.
    #[error(transparent)]
    Compat(#[from] CompatError),

    /// The study belongs to a project with no configured backend.
    #[error("no storage backend configured for project {project}")]
    NoBackend {
        /// Project id.
        project: String,
    },

    /// The study is not registered in the catalog.
    #[error("study {study} is not registered in the catalog")]
    UnknownStudy {
        /// Fully qualified study name.
        study: String,
    },

    /// Catalog or sync-state store error.
    #[error("storage error: {0}")]
    Store(#[from] crate::error::Error),
}
