//! CLI error types.

use std::process::ExitCode;

use thiserror::Error;
use tidemark_core::MigrationError;

/// Errors surfaced to the operator.
#[derive(Debug, Error)]
pub enum CliError {
    /// The engine refused or failed the run.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Writing a scaffold failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Rendering JSON output failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A flag combination or value is not usable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    /// Numeric status: 2 when another execution holds the lock, 1 otherwise.
    pub fn status(&self) -> u8 {
        match self {
            CliError::Migration(e) if e.is_lock_held() => 2,
            _ => 1,
        }
    }

    /// Process exit code for [`CliError::status`].
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.status())
    }
}
