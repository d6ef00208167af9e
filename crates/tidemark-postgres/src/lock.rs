//! Lock table for the PostgreSQL adapter.
//!
//! One row per store, keyed by store id. Inserts rely on the primary key,
//! takeovers on a conditional `UPDATE` matching the previous holder and expiry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tidemark_core::{AdapterError, AdapterResult, ExecutionId, LockBackend, LockRecord, StoreId};

use crate::adapter::PgAdapter;
use crate::ddl::quote_ident;
use crate::error::{backend, bootstrap};

#[async_trait]
impl LockBackend for PgAdapter {
    async fn ensure_locks(&self) -> AdapterResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             store TEXT PRIMARY KEY, \
             holder TEXT NOT NULL, \
             acquired_at TIMESTAMPTZ NOT NULL, \
             expires_at TIMESTAMPTZ NOT NULL)",
            quote_ident(&self.layout.lock_name)
        );
        bootstrap(sqlx::query(&sql).execute(&self.pool).await)
    }

    async fn get_lock(&self, store: &StoreId) -> AdapterResult<Option<LockRecord>> {
        let sql = format!(
            "SELECT holder, acquired_at, expires_at FROM {} WHERE store = $1",
            quote_ident(&self.layout.lock_name)
        );
        let row = sqlx::query(&sql)
            .bind(store.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let holder: String = row.try_get("holder").map_err(backend)?;
        let acquired_at: DateTime<Utc> = row.try_get("acquired_at").map_err(backend)?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(backend)?;
        Ok(Some(LockRecord {
            store: store.clone(),
            holder: ExecutionId::from_string(holder),
            acquired_at,
            expires_at,
        }))
    }

    async fn try_insert_lock(&self, record: &LockRecord) -> AdapterResult<bool> {
        let sql = format!(
            "INSERT INTO {} (store, holder, acquired_at, expires_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (store) DO NOTHING",
            quote_ident(&self.layout.lock_name)
        );
        let result = sqlx::query(&sql)
            .bind(record.store.as_str())
            .bind(record.holder.as_str())
            .bind(record.acquired_at)
            .bind(record.expires_at)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_replace_lock(
        &self,
        expected: &LockRecord,
        replacement: &LockRecord,
    ) -> AdapterResult<bool> {
        if expected.store != replacement.store {
            return Err(AdapterError::InvalidDefinition(
                "lock takeover must stay on the same store".to_string(),
            ));
        }
        let sql = format!(
            "UPDATE {} SET holder = $1, acquired_at = $2, expires_at = $3 \
             WHERE store = $4 AND holder = $5 AND expires_at = $6",
            quote_ident(&self.layout.lock_name)
        );
        let result = sqlx::query(&sql)
            .bind(replacement.holder.as_str())
            .bind(replacement.acquired_at)
            .bind(replacement.expires_at)
            .bind(expected.store.as_str())
            .bind(expected.holder.as_str())
            .bind(expected.expires_at)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn extend_lock(
        &self,
        store: &StoreId,
        holder: &ExecutionId,
        expires_at: DateTime<Utc>,
    ) -> AdapterResult<bool> {
        let sql = format!(
            "UPDATE {} SET expires_at = $1 WHERE store = $2 AND holder = $3",
            quote_ident(&self.layout.lock_name)
        );
        let result = sqlx::query(&sql)
            .bind(expires_at)
            .bind(store.as_str())
            .bind(holder.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_lock(&self, store: &StoreId, holder: &ExecutionId) -> AdapterResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE store = $1 AND holder = $2",
            quote_ident(&self.layout.lock_name)
        );
        let result = sqlx::query(&sql)
            .bind(store.as_str())
            .bind(holder.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }
}
