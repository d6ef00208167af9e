//! Ledger table for the PostgreSQL adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tidemark_core::{
    AdapterError, AdapterResult, Direction, ExecutionId, LedgerBackend, LedgerEntry, StoreId,
    Version,
};

use crate::adapter::PgAdapter;
use crate::ddl::quote_ident;
use crate::error::{backend, bootstrap};

pub(crate) fn to_i64(value: u64, what: &str) -> AdapterResult<i64> {
    i64::try_from(value)
        .map_err(|_| AdapterError::InvalidDefinition(format!("{what} {value} exceeds BIGINT")))
}

fn decode_entry(row: &PgRow) -> AdapterResult<LedgerEntry> {
    let store: String = row.try_get("store").map_err(backend)?;
    let seq: i64 = row.try_get("seq").map_err(backend)?;
    let version: i64 = row.try_get("version").map_err(backend)?;
    let direction: String = row.try_get("direction").map_err(backend)?;
    let execution_id: String = row.try_get("execution_id").map_err(backend)?;
    let applied_at: DateTime<Utc> = row.try_get("applied_at").map_err(backend)?;
    let elapsed: i64 = row.try_get("execution_time_ms").map_err(backend)?;

    let corrupt = |field: &str, value: String| {
        AdapterError::Backend(format!("ledger row has invalid {field}: {value}"))
    };
    Ok(LedgerEntry {
        store: StoreId::new(store.clone()).map_err(|_| corrupt("store", store))?,
        seq: u64::try_from(seq).map_err(|_| corrupt("seq", seq.to_string()))?,
        version: Version::new(
            u64::try_from(version).map_err(|_| corrupt("version", version.to_string()))?,
        ),
        name: row.try_get("name").map_err(backend)?,
        applied_at,
        execution_id: ExecutionId::from_string(execution_id),
        direction: direction
            .parse::<Direction>()
            .map_err(|_| corrupt("direction", direction.clone()))?,
        checksum: row.try_get("checksum").map_err(backend)?,
        execution_time_ms: u64::try_from(elapsed)
            .map_err(|_| corrupt("execution_time_ms", elapsed.to_string()))?,
    })
}

#[async_trait]
impl LedgerBackend for PgAdapter {
    async fn ensure_ledger(&self) -> AdapterResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             store TEXT NOT NULL, \
             seq BIGINT NOT NULL, \
             version BIGINT NOT NULL, \
             name TEXT NOT NULL, \
             applied_at TIMESTAMPTZ NOT NULL, \
             execution_id TEXT NOT NULL, \
             direction TEXT NOT NULL, \
             checksum TEXT, \
             execution_time_ms BIGINT NOT NULL DEFAULT 0, \
             PRIMARY KEY (store, seq))",
            quote_ident(&self.layout.ledger_name)
        );
        bootstrap(sqlx::query(&sql).execute(&self.pool).await)
    }

    async fn load_entries(&self, store: &StoreId) -> AdapterResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT store, seq, version, name, applied_at, execution_id, direction, checksum, \
             execution_time_ms FROM {} WHERE store = $1 ORDER BY seq",
            quote_ident(&self.layout.ledger_name)
        );
        let rows = sqlx::query(&sql)
            .bind(store.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(decode_entry).collect()
    }

    async fn append_entry(&self, entry: &LedgerEntry) -> AdapterResult<()> {
        let sql = format!(
            "INSERT INTO {} (store, seq, version, name, applied_at, execution_id, direction, \
             checksum, execution_time_ms) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (store, seq) DO NOTHING",
            quote_ident(&self.layout.ledger_name)
        );
        let inserted = sqlx::query(&sql)
            .bind(entry.store.as_str())
            .bind(to_i64(entry.seq, "seq")?)
            .bind(to_i64(entry.version.get(), "version")?)
            .bind(&entry.name)
            .bind(entry.applied_at)
            .bind(entry.execution_id.as_str())
            .bind(entry.direction.as_str())
            .bind(entry.checksum.as_deref())
            .bind(i64::try_from(entry.execution_time_ms).unwrap_or(i64::MAX))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if inserted.rows_affected() > 0 {
            return Ok(());
        }

        let sql = format!(
            "SELECT store, seq, version, name, applied_at, execution_id, direction, checksum, \
             execution_time_ms FROM {} WHERE store = $1 AND seq = $2",
            quote_ident(&self.layout.ledger_name)
        );
        let row = sqlx::query(&sql)
            .bind(entry.store.as_str())
            .bind(to_i64(entry.seq, "seq")?)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        entry.confirm_existing(&decode_entry(&row)?)
    }
}
