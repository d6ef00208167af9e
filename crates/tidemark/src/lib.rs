//! Tidemark - versioned schema migrations for relational and document stores.
//!
//! This crate re-exports the engine from `tidemark-core` and, behind
//! features, the store adapters and the command surface:
//!
//! - `postgres`: [`postgres::PgAdapter`] for PostgreSQL and TimescaleDB
//! - `mongo`: [`mongo::MongoAdapter`] for MongoDB
//! - `cli`: [`cli::execute`] and the `Cli` argument parser
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tidemark::postgres::{PgAdapter, PgConfig};
//! use tidemark::{MigrationRegistry, MigrationRunner, RunnerConfig, StoreId};
//!
//! let adapter = PgAdapter::connect(&PgConfig::from_env()).await?;
//! let registry = MigrationRegistry::builder(StoreId::new("analytics-service/postgres")?)
//!     .register(CreateMetricsHypertable)
//!     .build()?;
//! let runner = MigrationRunner::new(registry, Arc::new(adapter), RunnerConfig::default())?;
//! runner.migrate_up(None).await?;
//! ```

pub use tidemark_core::*;

/// PostgreSQL adapter.
#[cfg(feature = "postgres")]
pub mod postgres {
    pub use tidemark_postgres::*;
}

/// MongoDB adapter.
#[cfg(feature = "mongo")]
pub mod mongo {
    pub use tidemark_mongo::*;
}

/// Command surface.
#[cfg(feature = "cli")]
pub mod cli {
    pub use tidemark_cli::*;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct CreateUsers;

    #[async_trait]
    impl Migration for CreateUsers {
        fn version(&self) -> Version {
            Version::new(1)
        }

        fn name(&self) -> &str {
            "create users"
        }

        async fn up(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()> {
            adapter
                .create_collection(&CollectionSpec::new("users").column(FieldSpec::typed("id", "BIGINT")))
                .await
        }

        async fn down(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()> {
            adapter
                .drop_collection("users", &DropOptions::if_exists())
                .await
        }
    }

    #[tokio::test]
    async fn test_hand_written_migration_through_facade() {
        let store = Arc::new(MemoryStore::relational());
        let registry = MigrationRegistry::builder(StoreId::new("users-service/memory").unwrap())
            .register(CreateUsers)
            .build()
            .unwrap();
        let runner = MigrationRunner::new(registry, Arc::clone(&store), RunnerConfig::default()).unwrap();

        runner.migrate_up(None).await.unwrap();
        assert!(store.has_collection("users"));
        runner.rollback_last().await.unwrap();
        assert!(!store.has_collection("users"));
    }
}
