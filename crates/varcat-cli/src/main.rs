//! varcat command-line tool.
//!
//! Runs catalog and storage migrations and reconciles cached catalog status
//! with the storage backends.

mod commands;
mod config;
mod error;
mod formatter;
mod manifest;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use varcat_core::CancelHandle;

use commands::Workspace;
use config::{Args, CatalogCommand, Command, MigrateCommand};
use error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "varcat=info,varcat_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: Args) -> Result<u8, CliError> {
    let engine_config = args.engine_config()?;
    tracing::debug!(
        data_path = %args.data_path.display(),
        engine_version = %engine_config.engine_version,
        min_migration_version = %engine_config.min_migration_version,
        storage_mode = %engine_config.storage_mode,
        "configuration loaded"
    );

    let workspace = Workspace::open(&args.data_path, args.topology.as_deref(), engine_config)?;
    let formatter = formatter::create_formatter(args.format);

    let code = match &args.command {
        Command::Migrate(MigrateCommand::Run {
            domain,
            version,
            ids,
        }) => {
            commands::migrate_run(
                &workspace,
                (*domain).into(),
                version.as_deref(),
                ids.clone(),
                &*formatter,
            )
            .await?
        }
        Command::Migrate(MigrateCommand::Status { domain }) => {
            commands::migrate_status(&workspace, domain.map(Into::into), &*formatter)?
        }
        Command::SyncStorage(target) => {
            let cancel = CancelHandle::new();
            let handle = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for ctrl+c");
                    return;
                }
                tracing::info!("received interrupt, finishing studies in flight");
                handle.cancel();
            });
            commands::sync_storage(&workspace, target, &cancel, &*formatter).await?
        }
        Command::Catalog(CatalogCommand::Import { file }) => {
            commands::catalog_import(&workspace, file, &*formatter)?
        }
    };

    workspace.flush().await?;
    Ok(code)
}
