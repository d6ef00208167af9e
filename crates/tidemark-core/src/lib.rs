//! Tidemark Core - versioned schema migrations for relational and document stores.
//!
//! This crate provides the store-neutral engine: the adapter contract,
//! migration registry, execution ledger, lease locks and the runner that
//! ties them together. Concrete stores live in `tidemark-postgres` and
//! `tidemark-mongo`.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tidemark_core::{
//!     CollectionSpec, FieldSpec, MemoryStore, MigrationRegistry, MigrationRunner, Operation,
//!     RunnerConfig, ScriptedMigration, StoreId,
//! };
//!
//! let registry = MigrationRegistry::builder(StoreId::new("users-service/memory")?)
//!     .register(
//!         ScriptedMigration::new(1u64, "create users")
//!             .with_up(Operation::CreateCollection {
//!                 spec: CollectionSpec::new("users").column(FieldSpec::typed("id", "BIGINT")),
//!             })
//!             .reversible()?,
//!     )
//!     .build()?;
//!
//! let runner = MigrationRunner::new(registry, Arc::new(MemoryStore::new()), RunnerConfig::default())?;
//! let report = runner.migrate_up(None).await?;
//! println!("now at {:?}", report.to_version);
//! ```

pub mod adapter;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod memory;
pub mod migration;
pub mod registry;
pub mod runner;
pub mod status;
pub mod types;

pub use adapter::{
    signature, with_transaction, Atomicity, CollectionSpec, DropOptions, FieldDefault, FieldSpec, IndexKey,
    IndexOrder, IndexSpec, Predicate, RawStatement, StoreAdapter, StoreKind,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ChecksumPolicy, LockRetryPolicy, RunnerConfig, StoreLayout};
pub use error::{AdapterError, AdapterResult, MigrationError, ObjectKind};
pub use ledger::{LedgerBackend, LedgerEntry, LedgerView, MigrationLedger};
pub use lock::{LockBackend, LockGrant, LockManager, LockRecord, LockState};
pub use memory::{MemoryStore, SchemaSnapshot};
pub use migration::{Migration, Operation, ScriptedMigration};
pub use registry::{MigrationRegistry, RegistryBuilder};
pub use runner::{MigrationRunner, RunReport, RunState, RunWarning, StepOutcome};
pub use status::{AppliedMigration, StatusReport};
pub use types::{Direction, ExecutionId, MigrationId, StoreId, Version};

/// Re-export so hosts can pass `async_trait` migrations without a direct dependency.
pub use async_trait::async_trait;
