//! Tidemark CLI - operational commands for hosts that embed tidemark.
//!
//! Host binaries register their migrations, build a `MigrationRunner`, and
//! hand both to [`execute`]. The crate owns argument parsing, output and
//! exit codes; it never connects to a store itself.
//!
//! # Quick Start
//!
//! ```ignore
//! use clap::Parser;
//! use tidemark_cli::{execute, init_tracing, Cli};
//!
//! init_tracing(tidemark_cli::DEFAULT_DIRECTIVE);
//! let cli = Cli::parse();
//! let config = cli.into_config(RunnerConfig::default())?;
//! let runner = MigrationRunner::new(registry, store, config)?;
//! match execute(&cli, &runner).await {
//!     Ok(out) => print!("{out}"),
//!     Err(e) => {
//!         eprintln!("error: {e}");
//!         return e.exit_code();
//!     }
//! }
//! ```

pub mod args;
pub mod commands;
pub mod error;
pub mod logging;
pub mod render;
pub mod scaffold;

pub use args::{ChecksumArg, Cli, Command, CreateArgs, KindArg};
pub use commands::{create, execute};
pub use error::CliError;
pub use logging::{init_tracing, DEFAULT_DIRECTIVE};
