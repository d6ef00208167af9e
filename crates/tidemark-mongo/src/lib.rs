//! Tidemark Mongo - document store adapter for MongoDB.
//!
//! [`MongoAdapter`] implements the core `StoreAdapter`, `LedgerBackend` and
//! `LockBackend` traits over a `mongodb::Database`. Field changes are bulk
//! updates that skip documents already migrated, so an interrupted backfill
//! can simply be run again.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tidemark_core::{MigrationRunner, RunnerConfig};
//! use tidemark_mongo::{MongoAdapter, MongoConfig};
//!
//! let adapter = MongoAdapter::connect(&MongoConfig::from_env()).await?;
//! let runner = MigrationRunner::new(registry, Arc::new(adapter), RunnerConfig::default())?;
//! runner.migrate_up(None).await?;
//! ```

pub mod adapter;
pub mod config;
pub mod convert;
pub mod error;
mod ledger;
mod lock;

pub use adapter::MongoAdapter;
pub use config::MongoConfig;
pub use error::MongoError;
