//! Dispatch of parsed commands to a runner.

use std::path::PathBuf;

use chrono::Utc;
use tidemark_core::{Direction, MigrationRunner};
use tracing::info;

use crate::args::{version, Cli, Command, CreateArgs};
use crate::error::CliError;
use crate::render;
use crate::scaffold;

/// Run `cli.command` against `runner` and return the text to print.
///
/// Fails with `InvalidArgument` when `--store` names a different store than
/// the runner's registry.
pub async fn execute(cli: &Cli, runner: &MigrationRunner) -> Result<String, CliError> {
    if let Some(store) = cli.store_id()? {
        if &store != runner.registry().store() {
            return Err(CliError::InvalidArgument(format!(
                "--store {store} does not match runner store {}",
                runner.registry().store()
            )));
        }
    }

    match &cli.command {
        Command::Up { to } => {
            let report = runner.migrate_up(to.map(version)).await?;
            Ok(render::run_report(&report))
        }
        Command::Down { to } => {
            let report = runner.migrate_down(version(*to)).await?;
            Ok(render::run_report(&report))
        }
        Command::Rollback => {
            let report = runner.rollback_last().await?;
            Ok(render::run_report(&report))
        }
        Command::Status { json } => {
            let status = runner.status().await?;
            if *json {
                Ok(serde_json::to_string_pretty(&status)? + "\n")
            } else {
                Ok(render::status_report(&status))
            }
        }
        Command::Plan { down, to } => {
            let direction = if *down { Direction::Down } else { Direction::Up };
            let report = runner.plan(direction, to.map(version)).await?;
            Ok(render::run_report(&report))
        }
        Command::Create(args) => {
            let path = create(args)?;
            Ok(format!("created {}\n", path.display()))
        }
    }
}

/// Handle `create` without a runner.
pub fn create(args: &CreateArgs) -> Result<PathBuf, CliError> {
    let path = scaffold::create_migration(&args.dir, &args.name, args.kind.into(), Utc::now())?;
    info!(path = %path.display(), "Created migration skeleton");
    Ok(path)
}
