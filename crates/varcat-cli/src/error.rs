//! CLI error type and exit codes.

use std::path::PathBuf;

use thiserror::Error;

use varcat_core::{MigrationError, SyncError};

/// Exit code for a command that completed with failed, pending or
/// unsynchronized work.
pub const EXIT_INCOMPLETE: u8 = 1;

/// Exit code for an invalid migration manifest or selection.
pub const EXIT_DESCRIPTOR: u8 = 2;

/// Errors that abort a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid {flag}: {reason}")]
    InvalidArgument { flag: String, reason: String },

    #[error("{}: {reason}", path.display())]
    Input { path: PathBuf, reason: String },

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] varcat_core::Error),

    #[error("failed to open catalog database: {0}")]
    Database(#[from] sled::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Migration(MigrationError::Descriptor(_)) => EXIT_DESCRIPTOR,
            _ => EXIT_INCOMPLETE,
        }
    }
}
