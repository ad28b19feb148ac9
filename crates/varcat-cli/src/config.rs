//! CLI configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use varcat_core::config::{
    DEFAULT_MAX_CONFLICT_RETRIES, DEFAULT_STUDY_TIMEOUT_SECS, DEFAULT_WORKER_POOL_SIZE,
};
use varcat_core::{Domain, EngineConfig, StorageMode, Version};

use crate::error::CliError;
use crate::formatter::OutputFormat;

/// Default catalog data directory.
pub const DEFAULT_DATA_PATH: &str = "./varcat-data";

/// Default engine version compared against `deprecated_since`.
pub const DEFAULT_ENGINE_VERSION: &str = "3.0.0";

/// Default oldest migration version still executed.
pub const DEFAULT_MIN_MIGRATION_VERSION: &str = "2.0.0";

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "varcat")]
#[command(version, about = "Variant catalog migrations and storage reconciliation", long_about = None)]
pub struct Args {
    /// Path to the catalog data directory.
    #[arg(short, long, global = true, default_value = DEFAULT_DATA_PATH)]
    pub data_path: PathBuf,

    /// JSON file mapping projects to storage backends.
    #[arg(short, long, global = true)]
    pub topology: Option<PathBuf>,

    /// Engine version.
    #[arg(long, global = true, default_value = DEFAULT_ENGINE_VERSION)]
    pub engine_version: String,

    /// Migrations targeting an older version are skipped as outdated.
    #[arg(long, global = true, default_value = DEFAULT_MIN_MIGRATION_VERSION)]
    pub min_migration_version: String,

    /// Studies reconciled concurrently.
    #[arg(long, global = true, default_value_t = DEFAULT_WORKER_POOL_SIZE)]
    pub workers: usize,

    /// Per-study reconciliation timeout in seconds.
    #[arg(long, global = true, default_value_t = DEFAULT_STUDY_TIMEOUT_SECS)]
    pub study_timeout: u64,

    /// Compare-and-set retries per divergent entity.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CONFLICT_RETRIES)]
    pub conflict_retries: u32,

    /// Treat storage backends as read-only; STORAGE migrations are deferred.
    #[arg(long, global = true)]
    pub read_only_storage: bool,

    /// Output format.
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run or inspect migrations.
    #[command(subcommand)]
    Migrate(MigrateCommand),

    /// Reconcile cached catalog status with storage.
    SyncStorage(SyncArgs),

    /// Manage the local catalog.
    #[command(subcommand)]
    Catalog(CatalogCommand),
}

/// `migrate` subcommands.
#[derive(Subcommand, Debug)]
pub enum MigrateCommand {
    /// Run the migrations of a domain.
    Run {
        /// Domain to migrate.
        #[arg(long, value_enum)]
        domain: DomainArg,

        /// Only run migrations targeting this version or earlier.
        #[arg(long)]
        version: Option<String>,

        /// Only run these migration ids (comma separated or repeated).
        #[arg(long = "id", value_delimiter = ',')]
        ids: Vec<String>,
    },

    /// Show the migration run log.
    Status {
        /// Restrict to one domain.
        #[arg(long, value_enum)]
        domain: Option<DomainArg>,
    },
}

/// `sync-storage` target.
#[derive(ClapArgs, Debug)]
pub struct SyncArgs {
    /// Fully qualified study name.
    #[arg(long, conflicts_with = "project")]
    pub study: Option<String>,

    /// Project id; every study of the project is reconciled.
    #[arg(long)]
    pub project: Option<String>,
}

/// `catalog` subcommands.
#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// Import studies and entities from a JSON document.
    Import {
        /// Document to import.
        #[arg(long)]
        file: PathBuf,
    },
}

/// Migration domain as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DomainArg {
    Catalog,
    Storage,
}

impl From<DomainArg> for Domain {
    fn from(arg: DomainArg) -> Self {
        match arg {
            DomainArg::Catalog => Domain::Catalog,
            DomainArg::Storage => Domain::Storage,
        }
    }
}

impl Args {
    /// Convert the global flags to an engine configuration.
    pub fn engine_config(&self) -> Result<EngineConfig, CliError> {
        let engine_version = parse_version("--engine-version", &self.engine_version)?;
        let min_migration_version =
            parse_version("--min-migration-version", &self.min_migration_version)?;
        let storage_mode = if self.read_only_storage {
            StorageMode::ReadOnly
        } else {
            StorageMode::ReadWrite
        };

        Ok(EngineConfig::new(engine_version, min_migration_version)
            .with_worker_pool_size(self.workers)
            .with_study_timeout(Duration::from_secs(self.study_timeout))
            .with_max_conflict_retries(self.conflict_retries)
            .with_storage_mode(storage_mode))
    }
}

pub(crate) fn parse_version(flag: &str, value: &str) -> Result<Version, CliError> {
    Version::parse(value).map_err(|e| CliError::InvalidArgument {
        flag: flag.to_string(),
        reason: e.to_string(),
    })
}

/// Backend serving one project.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectBackend {
    /// Backend identifier, e.g. `hadoop` or `mongodb`.
    pub backend: String,
    /// Backend version reported to the compatibility resolver.
    pub version: String,
    /// Metadata snapshot exported by the backend.
    pub snapshot: PathBuf,
}

/// Project to backend mapping.
///
/// ```json
/// {
///   "projects": {
///     "grch38": { "backend": "hadoop", "version": "3.1.0", "snapshot": "grch38.json" }
///   }
/// }
/// ```
///
/// Relative snapshot paths are resolved against the topology file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectBackend>,
}

impl Topology {
    /// Load a topology file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let bytes = std::fs::read(path).map_err(|e| CliError::Input {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut topology: Topology =
            serde_json::from_slice(&bytes).map_err(|e| CliError::Input {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        for backend in topology.projects.values_mut() {
            if backend.snapshot.is_relative() {
                backend.snapshot = base.join(&backend.snapshot);
            }
        }
        Ok(topology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = Args::parse_from(["varcat", "migrate", "status"]);
        assert_eq!(args.data_path, PathBuf::from(DEFAULT_DATA_PATH));
        assert!(args.topology.is_none());
        assert_eq!(args.format, OutputFormat::Table);

        let config = args.engine_config().unwrap();
        assert_eq!(config.engine_version, Version::new(3, 0, 0));
        assert_eq!(config.min_migration_version, Version::new(2, 0, 0));
        assert_eq!(config.worker_pool_size, DEFAULT_WORKER_POOL_SIZE);
        assert!(!config.is_storage_read_only());
    }

    #[test]
    fn test_migrate_run_args() {
        let args = Args::parse_from([
            "varcat",
            "migrate",
            "run",
            "--domain",
            "storage",
            "--id",
            "a,b",
            "--id",
            "c",
            "--read-only-storage",
        ]);
        match &args.command {
            Command::Migrate(MigrateCommand::Run { domain, version, ids }) => {
                assert_eq!(Domain::from(*domain), Domain::Storage);
                assert!(version.is_none());
                assert_eq!(ids, &["a", "b", "c"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(args.engine_config().unwrap().is_storage_read_only());
    }

    #[test]
    fn test_sync_targets_are_exclusive() {
        let result = Args::try_parse_from([
            "varcat",
            "sync-storage",
            "--study",
            "grch38:cancer",
            "--project",
            "grch38",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_engine_version() {
        let args = Args::parse_from(["varcat", "--engine-version", "three", "migrate", "status"]);
        assert!(matches!(
            args.engine_config(),
            Err(CliError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_topology_resolves_relative_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(
            &path,
            r#"{
                "projects": {
                    "grch38": { "backend": "hadoop", "version": "3.1.0", "snapshot": "grch38.json" },
                    "grch37": { "backend": "mongodb", "version": "4.2.0", "snapshot": "/srv/grch37.json" }
                }
            }"#,
        )
        .unwrap();

        let topology = Topology::load(&path).unwrap();
        assert_eq!(topology.projects.len(), 2);
        assert_eq!(
            topology.projects["grch38"].snapshot,
            dir.path().join("grch38.json")
        );
        assert_eq!(
            topology.projects["grch37"].snapshot,
            PathBuf::from("/srv/grch37.json")
        );
    }

    #[test]
    fn test_missing_topology_file() {
        let result = Topology::load(Path::new("/nonexistent/topology.json"));
        assert!(matches!(result, Err(CliError::Input { .. })));
    }
}
