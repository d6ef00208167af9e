//! The store adapter contract.
//!
//! Migrations only ever see a `&dyn StoreAdapter`. Each concrete store
//! translates these operations into its own DDL or admin commands and
//! reports how much atomicity it can offer.

mod spec;

pub use spec::{
    signature, CollectionSpec, DropOptions, FieldDefault, FieldSpec, IndexKey, IndexOrder,
    IndexSpec, Predicate, RawStatement,
};

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::AdapterResult;

/// Structural family of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Tables, columns and SQL DDL.
    Relational,
    /// Collections, indexes and document updates.
    Document,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Relational => write!(f, "relational"),
            StoreKind::Document => write!(f, "document"),
        }
    }
}

/// Failure semantics an adapter provides for one migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Atomicity {
    /// All operations of a migration commit or roll back together.
    Transactional,
    /// Operations take effect one by one; a failure leaves earlier ones applied.
    BestEffort,
}

/// Store-specific half of every migration.
///
/// Creation operations fail with `AlreadyExists` unless their spec asks for
/// `if_not_exists`; drop operations fail with `NotFound` unless
/// [`DropOptions::if_exists`] is set. Names starting with the reserved
/// `_tidemark` prefix are rejected with `InvalidDefinition`.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Which family of store this is.
    fn kind(&self) -> StoreKind;

    /// Whether a migration's operations can be grouped atomically.
    fn atomicity(&self) -> Atomicity;

    /// Create a table or collection.
    async fn create_collection(&self, spec: &CollectionSpec) -> AdapterResult<()>;

    /// Drop a table or collection.
    async fn drop_collection(&self, name: &str, options: &DropOptions) -> AdapterResult<()>;

    /// Create an index and return the name it was created under.
    async fn create_index(&self, target: &str, spec: &IndexSpec) -> AdapterResult<String>;

    /// Drop an index by name.
    async fn drop_index(&self, target: &str, name: &str, options: &DropOptions)
        -> AdapterResult<()>;

    /// Add a column, or backfill a field into documents lacking it.
    ///
    /// Returns the number of affected rows or documents when the store reports one.
    async fn add_field(&self, target: &str, field: &FieldSpec) -> AdapterResult<u64>;

    /// Drop a column, or unset a field in every document.
    async fn remove_field(
        &self,
        target: &str,
        name: &str,
        options: &DropOptions,
    ) -> AdapterResult<u64>;

    /// Rename a column or document field.
    async fn rename_field(&self, target: &str, from: &str, to: &str) -> AdapterResult<u64>;

    /// Run a store-specific statement.
    async fn execute(&self, statement: &RawStatement) -> AdapterResult<u64>;

    /// Start a unit of work. No-op for best-effort stores.
    async fn begin_unit(&self) -> AdapterResult<()> {
        Ok(())
    }

    /// Commit the current unit of work.
    async fn commit_unit(&self) -> AdapterResult<()> {
        Ok(())
    }

    /// Discard the current unit of work.
    async fn rollback_unit(&self) -> AdapterResult<()> {
        Ok(())
    }
}

/// Run `f` inside a unit of work when the adapter is transactional.
///
/// On error the unit is rolled back and the original error returned. A
/// best-effort adapter runs `f` directly.
pub async fn with_transaction<'a, T, F>(adapter: &'a dyn StoreAdapter, f: F) -> AdapterResult<T>
where
    T: Send + 'a,
    F: FnOnce(&'a dyn StoreAdapter) -> BoxFuture<'a, AdapterResult<T>> + Send,
{
    if adapter.atomicity() == Atomicity::BestEffort {
        return f(adapter).await;
    }

    adapter.begin_unit().await?;
    match f(adapter).await {
        Ok(value) => {
            adapter.commit_unit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = adapter.rollback_unit().await {
                tracing::warn!(
                    error = %rollback_err,
                    "Failed to roll back unit of work"
                );
            }
            Err(e)
        }
    }
}
