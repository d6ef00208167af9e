//! Tidemark demo host: runs the bundled service migrations.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tidemark::cli::{create, execute, init_tracing, Cli, CliError, Command, DEFAULT_DIRECTIVE};
use tidemark::mongo::{MongoAdapter, MongoConfig};
use tidemark::postgres::{PgAdapter, PgConfig};
use tidemark::{AdapterError, MigrationError, MigrationRunner, RunnerConfig, StoreKind};
use tidemark_demo::Service;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing(DEFAULT_DIRECTIVE);
    let cli = Cli::parse();

    match run(&cli).await {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

async fn run(cli: &Cli) -> Result<String, CliError> {
    if let Command::Create(args) = &cli.command {
        let path = create(args)?;
        return Ok(format!("created {}\n", path.display()));
    }

    let store = cli
        .store_id()?
        .ok_or_else(|| CliError::InvalidArgument("--store is required".to_string()))?;
    let service = Service::from_store(&store).ok_or_else(|| {
        let known: Vec<_> = Service::ALL.iter().map(|s| s.store()).collect();
        CliError::InvalidArgument(format!("unknown store {store}, expected one of {known:?}"))
    })?;
    let registry = service.registry()?;
    let config = cli.into_config(RunnerConfig::default())?;

    let runner = match service.kind() {
        StoreKind::Relational => {
            let adapter = PgAdapter::connect(&PgConfig::from_env())
                .await
                .map_err(|e| MigrationError::from(AdapterError::from(e)))?;
            MigrationRunner::new(registry, Arc::new(adapter), config)?
        }
        StoreKind::Document => {
            let adapter = MongoAdapter::connect(&MongoConfig::from_env())
                .await
                .map_err(|e| MigrationError::from(AdapterError::from(e)))?;
            MigrationRunner::new(registry, Arc::new(adapter), config)?
        }
    };
    tracing::info!(store = %store, kind = ?service.kind(), "Connected");

    execute(cli, &runner).await
}
