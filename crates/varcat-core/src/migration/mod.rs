//! Versioned migration engine.
//!
//! Migrations are declared in a manifest supplied by a
//! [`MigrationProvider`], validated and ordered by the
//! [`MigrationRegistry`], and driven one domain at a time by the
//! [`MigrationExecutor`]. Progress is persisted in a [`RunLog`] so re-running
//! is idempotent and interrupted runs are recovered.
//!
//! # Ordering
//!
//! Migrations are applied in ascending order of
//! `(target version, rank, patch, id)`.
//!
//! # Example
//!
//! ```ignore
//! use varcat_core::migration::{MigrationExecutor, MigrationRegistry, MigrationSelection, Domain};
//!
//! let registry = Arc::new(MigrationRegistry::load(&manifest)?);
//! let executor = MigrationExecutor::new(registry, run_log, contexts, config);
//!
//! let report = executor.run(Domain::Catalog, &MigrationSelection::all()).await?;
//! for err in &report.outdated {
//!     eprintln!("{err}");
//! }
//! ```

pub mod descriptor;
pub mod error;
pub mod executor;
pub mod registry;
pub mod state;

pub use descriptor::{Domain, ManifestEntry, MigrationBody, MigrationDescriptor, MigrationProvider};
pub use error::{BoxError, DescriptorError, MigrationError, OutdatedMigrationError};
pub use executor::{MigrationExecutor, MigrationSelection, RunReport, StatusReport};
pub use registry::{MigrationRegistry, ResolvedMigration};
pub use state::{MigrationRun, PatchDrift, RunLog, RunStatus, RunSummary, SledRunLog};
