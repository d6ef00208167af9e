//! Relational store adapter over a PostgreSQL pool.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tidemark_core::config::is_reserved;
use tidemark_core::{
    signature, AdapterError, AdapterResult, Atomicity, CollectionSpec, DropOptions, FieldSpec,
    IndexOrder, IndexSpec, ObjectKind, RawStatement, StoreAdapter, StoreKind, StoreLayout,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::PgConfig;
use crate::ddl;
use crate::error::{backend, classify, PgError};

const INDEX_KEYS_SQL: &str = "\
SELECT a.attname::text, (i.indoption[(k.ord - 1)::int] & 1) = 1 AS descending \
FROM pg_index i \
JOIN pg_class c ON c.oid = i.indexrelid \
JOIN pg_namespace n ON n.oid = c.relnamespace \
JOIN pg_class t ON t.oid = i.indrelid \
CROSS JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord) \
JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum \
WHERE c.relname = $1 AND n.nspname = COALESCE($2, current_schema()) AND t.relname = $3 \
ORDER BY k.ord";

/// PostgreSQL (and TimescaleDB) adapter.
///
/// Operations run on the pool, or on the open unit of work between
/// `begin_unit` and `commit_unit`/`rollback_unit`. The ledger and lock tables
/// are always written through the pool so they never share a migration's
/// transaction.
pub struct PgAdapter {
    pub(crate) pool: PgPool,
    pub(crate) layout: StoreLayout,
    unit: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PgAdapter {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            layout: StoreLayout::default(),
            unit: Mutex::new(None),
        }
    }

    /// Connect using `config`.
    pub async fn connect(config: &PgConfig) -> Result<Self, PgError> {
        let pool = config.connect().await?;
        Ok(Self::new(pool).with_layout(config.layout.clone()))
    }

    /// Use custom ledger and lock table names.
    pub fn with_layout(mut self, layout: StoreLayout) -> Self {
        self.layout = layout;
        self
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn in_unit(&self) -> bool {
        self.unit.lock().await.is_some()
    }

    /// Run one statement on the current unit or the pool.
    async fn run(&self, sql: &str, target: &str, kind: ObjectKind, name: &str) -> AdapterResult<u64> {
        debug!(sql = %sql, "Executing statement");
        let mut unit = self.unit.lock().await;
        let result = match unit.as_mut() {
            Some(tx) => sqlx::query(sql).execute(&mut **tx).await,
            None => sqlx::query(sql).execute(&self.pool).await,
        };
        result
            .map(|r| r.rows_affected())
            .map_err(|e| classify(e, target, kind, name))
    }

    /// Key signature of an existing index, or `None` if it does not exist.
    async fn index_signature(&self, table: &str, name: &str) -> AdapterResult<Option<String>> {
        let schema = ddl::schema_of(table);
        let mut unit = self.unit.lock().await;
        let query = sqlx::query_as::<_, (String, bool)>(INDEX_KEYS_SQL)
            .bind(name)
            .bind(schema)
            .bind(bare_table(table));
        let rows = match unit.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await,
            None => query.fetch_all(&self.pool).await,
        }
        .map_err(backend)?;

        if rows.is_empty() {
            return Ok(None);
        }
        let keys = rows.iter().map(|(field, descending)| {
            let order = if *descending {
                IndexOrder::Desc
            } else {
                IndexOrder::Asc
            };
            (field.as_str(), order)
        });
        Ok(Some(signature(keys)))
    }
}

fn check_name(name: &str) -> AdapterResult<()> {
    let bare = name.rsplit('.').next().unwrap_or(name);
    if is_reserved(bare) {
        return Err(AdapterError::InvalidDefinition(format!(
            "{name} is in the reserved _tidemark namespace"
        )));
    }
    Ok(())
}

fn bare_table(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

#[async_trait]
impl StoreAdapter for PgAdapter {
    fn kind(&self) -> StoreKind {
        StoreKind::Relational
    }

    fn atomicity(&self) -> Atomicity {
        Atomicity::Transactional
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> AdapterResult<()> {
        check_name(&spec.name)?;
        let sql = ddl::create_table(spec)?;
        self.run(&sql, &spec.name, ObjectKind::Collection, &spec.name)
            .await?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str, options: &DropOptions) -> AdapterResult<()> {
        check_name(name)?;
        self.run(&ddl::drop_table(name, options), name, ObjectKind::Collection, name)
            .await?;
        Ok(())
    }

    async fn create_index(&self, target: &str, spec: &IndexSpec) -> AdapterResult<String> {
        check_name(target)?;
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| spec.relational_default_name(bare_table(target)));

        if let Some(existing) = self.index_signature(target, &name).await? {
            let requested = spec.key_signature();
            if existing != requested {
                return Err(AdapterError::IndexConflict {
                    name,
                    existing,
                    requested,
                });
            }
            if spec.if_not_exists {
                return Ok(name);
            }
            return Err(AdapterError::AlreadyExists {
                kind: ObjectKind::Index,
                name,
            });
        }

        let concurrently = !self.in_unit().await;
        let sql = ddl::create_index(target, &name, spec, concurrently)?;
        self.run(&sql, target, ObjectKind::Index, &name).await?;
        Ok(name)
    }

    async fn drop_index(&self, target: &str, name: &str, options: &DropOptions) -> AdapterResult<()> {
        check_name(target)?;
        self.run(&ddl::drop_index(target, name, options), target, ObjectKind::Index, name)
            .await?;
        Ok(())
    }

    async fn add_field(&self, target: &str, field: &FieldSpec) -> AdapterResult<u64> {
        check_name(target)?;
        let sql = ddl::add_column(target, field)?;
        self.run(&sql, target, ObjectKind::Field, &field.name).await
    }

    async fn remove_field(
        &self,
        target: &str,
        name: &str,
        options: &DropOptions,
    ) -> AdapterResult<u64> {
        check_name(target)?;
        self.run(&ddl::drop_column(target, name, options), target, ObjectKind::Field, name)
            .await
    }

    async fn rename_field(&self, target: &str, from: &str, to: &str) -> AdapterResult<u64> {
        check_name(target)?;
        let sql = ddl::rename_column(target, from, to);
        match self.run(&sql, target, ObjectKind::Field, from).await {
            // A duplicate column here is the destination name.
            Err(AdapterError::AlreadyExists { kind, .. }) => Err(AdapterError::AlreadyExists {
                kind,
                name: to.to_string(),
            }),
            other => other,
        }
    }

    async fn execute(&self, statement: &RawStatement) -> AdapterResult<u64> {
        let sql = match statement {
            RawStatement::Sql(sql) => sql,
            RawStatement::Command(_) => {
                return Err(AdapterError::Unsupported {
                    operation: "document command",
                    store: StoreKind::Relational,
                })
            }
        };
        debug!(sql = %sql, "Executing raw statement");
        let mut unit = self.unit.lock().await;
        let result = match unit.as_mut() {
            Some(tx) => sqlx::Executor::execute(&mut **tx, sqlx::raw_sql(sql)).await,
            None => sqlx::raw_sql(sql).execute(&self.pool).await,
        };
        result.map(|r| r.rows_affected()).map_err(backend)
    }

    async fn begin_unit(&self) -> AdapterResult<()> {
        let mut unit = self.unit.lock().await;
        if unit.is_some() {
            return Err(AdapterError::Transaction(
                "a unit of work is already open".to_string(),
            ));
        }
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AdapterError::Transaction(e.to_string()))?;
        *unit = Some(tx);
        Ok(())
    }

    async fn commit_unit(&self) -> AdapterResult<()> {
        let tx = self.unit.lock().await.take();
        match tx {
            Some(tx) => tx
                .commit()
                .await
                .map_err(|e| AdapterError::Transaction(e.to_string())),
            None => Err(AdapterError::Transaction(
                "no unit of work to commit".to_string(),
            )),
        }
    }

    async fn rollback_unit(&self) -> AdapterResult<()> {
        let tx = self.unit.lock().await.take();
        match tx {
            Some(tx) => tx
                .rollback()
                .await
                .map_err(|e| AdapterError::Transaction(e.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names_rejected() {
        assert!(check_name("_tidemark_ledger").is_err());
        assert!(check_name("public._tidemark_locks").is_err());
        assert!(check_name("analytics.metrics").is_ok());
    }

    #[test]
    fn test_bare_table() {
        assert_eq!(bare_table("analytics.metrics"), "metrics");
        assert_eq!(bare_table("users"), "users");
    }

    #[test]
    fn test_index_lookup_binds_owning_table() {
        assert!(INDEX_KEYS_SQL.contains("t.oid = i.indrelid"));
        assert!(INDEX_KEYS_SQL.contains("t.relname = $3"));
    }
}
