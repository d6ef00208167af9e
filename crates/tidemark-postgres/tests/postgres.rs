//! Integration tests against a live PostgreSQL server.
//!
//! Skipped unless `DATABASE_URL` is set. Every test uses its own tables and
//! store id so runs can share a database.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use sqlx::PgPool;
use tidemark_core::{
    AdapterError, CollectionSpec, ExecutionId, FieldSpec, IndexSpec, LedgerBackend, LockBackend,
    LockManager, LockRetryPolicy, MigrationError, MigrationRegistry, MigrationRunner, Operation,
    RunState, RunnerConfig, ScriptedMigration, StoreAdapter, StoreId, SystemClock, Version,
    with_transaction,
};
use tidemark_postgres::{PgAdapter, PgConfig};

struct TestContext {
    adapter: Arc<PgAdapter>,
    store: StoreId,
    table: String,
}

impl TestContext {
    async fn new() -> Option<Self> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let adapter = PgAdapter::connect(&PgConfig::new(url).with_max_connections(4))
            .await
            .expect("connect to DATABASE_URL");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Some(Self {
            adapter: Arc::new(adapter),
            store: StoreId::new(format!("tests/pg-{suffix}")).unwrap(),
            table: format!("users_{}", &suffix[..12]),
        })
    }

    fn pool(&self) -> &PgPool {
        self.adapter.pool()
    }

    fn registry(&self) -> MigrationRegistry {
        let table = self.table.clone();
        MigrationRegistry::builder(self.store.clone())
            .register(
                ScriptedMigration::new(1u64, "create users")
                    .with_up(Operation::CreateCollection {
                        spec: CollectionSpec::new(&table)
                            .column(FieldSpec::typed("id", "BIGINT").not_null())
                            .primary_key(["id"]),
                    })
                    .reversible()
                    .unwrap(),
            )
            .register(
                ScriptedMigration::new(2u64, "add email")
                    .with_up(Operation::AddField {
                        target: table.clone(),
                        field: FieldSpec::typed("email", "TEXT"),
                    })
                    .with_up(Operation::CreateIndex {
                        target: table.clone(),
                        spec: IndexSpec::new()
                            .asc("email")
                            .unique()
                            .background()
                            .named(format!("idx_{table}_email")),
                    })
                    .reversible()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    fn runner(&self, registry: MigrationRegistry) -> MigrationRunner {
        let config = RunnerConfig::default()
            .with_lock_retry(LockRetryPolicy::no_retry())
            .with_ledger_retry(3, Duration::from_millis(10));
        MigrationRunner::new(registry, Arc::clone(&self.adapter), config).unwrap()
    }

    async fn columns(&self) -> Vec<String> {
        sqlx::query_scalar::<_, String>(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_name = $1 ORDER BY ordinal_position",
        )
        .bind(&self.table)
        .fetch_all(self.pool())
        .await
        .unwrap()
    }

    async fn cleanup(&self) {
        let _ = sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\" CASCADE", self.table))
            .execute(self.pool())
            .await;
    }
}

#[tokio::test]
async fn test_up_down_roundtrip() {
    let Some(ctx) = TestContext::new().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let runner = ctx.runner(ctx.registry());

    let report = runner.migrate_up(None).await.unwrap();
    assert_eq!(report.to_version, Some(Version::new(2)));
    assert_eq!(report.final_state, RunState::Done);
    assert_eq!(ctx.columns().await, vec!["id", "email"]);

    let status = runner.status().await.unwrap();
    assert!(status.is_up_to_date());
    assert_eq!(status.applied.len(), 2);

    let report = runner.migrate_down(Version::ZERO).await.unwrap();
    assert_eq!(report.to_version, None);
    assert!(ctx.columns().await.is_empty());

    runner.migrate_up(None).await.unwrap();
    assert_eq!(ctx.columns().await, vec!["id", "email"]);
    ctx.cleanup().await;
}

#[tokio::test]
async fn test_failed_migration_rolls_back_its_transaction() {
    let Some(ctx) = TestContext::new().await else {
        return;
    };
    let registry = MigrationRegistry::builder(ctx.store.clone())
        .register(
            ScriptedMigration::new(1u64, "half applied")
                .with_up(Operation::CreateCollection {
                    spec: CollectionSpec::new(&ctx.table).column(FieldSpec::typed("id", "BIGINT")),
                })
                .with_up(Operation::AddField {
                    target: ctx.table.clone(),
                    field: FieldSpec::typed("id", "BIGINT"),
                }),
        )
        .build()
        .unwrap();

    let err = ctx.runner(registry).migrate_up(None).await.unwrap_err();
    match err {
        MigrationError::MigrationFailed {
            confirmed_version,
            source,
            ..
        } => {
            assert_eq!(confirmed_version, None);
            assert!(matches!(source, AdapterError::AlreadyExists { .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(ctx.columns().await.is_empty());

    let backend: Arc<dyn LockBackend> = ctx.adapter.clone();
    let locks = LockManager::new(backend, Arc::new(SystemClock));
    assert_eq!(locks.inspect(&ctx.store).await.unwrap(), tidemark_core::LockState::Free);
}

#[tokio::test]
async fn test_index_conflict_detected() {
    let Some(ctx) = TestContext::new().await else {
        return;
    };
    let adapter: &dyn StoreAdapter = ctx.adapter.as_ref();
    adapter
        .create_collection(
            &CollectionSpec::new(&ctx.table)
                .column(FieldSpec::typed("a", "INT"))
                .column(FieldSpec::typed("b", "INT")),
        )
        .await
        .unwrap();

    let name = adapter
        .create_index(&ctx.table, &IndexSpec::new().asc("a").desc("b"))
        .await
        .unwrap();
    assert_eq!(name, format!("idx_{}_a_b", ctx.table));

    let again = adapter
        .create_index(&ctx.table, &IndexSpec::new().asc("a").desc("b").if_not_exists())
        .await
        .unwrap();
    assert_eq!(again, name);

    let err = adapter
        .create_index(&ctx.table, &IndexSpec::new().asc("b").named(&name))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::IndexConflict { .. }));
    ctx.cleanup().await;
}

#[tokio::test]
async fn test_transaction_helper_discards_partial_work() {
    let Some(ctx) = TestContext::new().await else {
        return;
    };
    let adapter: &dyn StoreAdapter = ctx.adapter.as_ref();
    let table = ctx.table.clone();
    let result = with_transaction(adapter, move |a| {
        async move {
            a.create_collection(&CollectionSpec::new(&table).column(FieldSpec::typed("id", "INT")))
                .await?;
            a.drop_collection("missing_table_for_rollback", &Default::default())
                .await
        }
        .boxed()
    })
    .await;
    assert!(matches!(result, Err(AdapterError::NotFound { .. })));
    assert!(ctx.columns().await.is_empty());
}

#[tokio::test]
async fn test_ledger_append_is_idempotent() {
    let Some(ctx) = TestContext::new().await else {
        return;
    };
    ctx.adapter.ensure_ledger().await.unwrap();
    let entry = tidemark_core::LedgerEntry {
        store: ctx.store.clone(),
        seq: 1,
        version: Version::new(1704000000001),
        name: "create-metrics-hypertable".to_string(),
        applied_at: tidemark_core::clock::truncate_millis(chrono::Utc::now()),
        execution_id: ExecutionId::generate(),
        direction: tidemark_core::Direction::Up,
        checksum: Some("abc".to_string()),
        execution_time_ms: 12,
    };
    ctx.adapter.append_entry(&entry).await.unwrap();
    ctx.adapter.append_entry(&entry).await.unwrap();

    let mut rival = entry.clone();
    rival.execution_id = ExecutionId::generate();
    let err = ctx.adapter.append_entry(&rival).await.unwrap_err();
    assert!(matches!(err, AdapterError::LedgerConflict(_)));

    let loaded = ctx.adapter.load_entries(&ctx.store).await.unwrap();
    assert_eq!(loaded, vec![entry]);
}

#[tokio::test]
async fn test_negative_execution_time_is_corrupt() {
    let Some(ctx) = TestContext::new().await else {
        return;
    };
    ctx.adapter.ensure_ledger().await.unwrap();
    sqlx::query(
        "INSERT INTO \"_tidemark_ledger\" (store, seq, version, name, applied_at, \
         execution_id, direction, execution_time_ms) \
         VALUES ($1, 1, 1, 'create users', now(), 'exec-a', 'up', -5)",
    )
    .bind(ctx.store.as_str())
    .execute(ctx.pool())
    .await
    .unwrap();

    let err = ctx.adapter.load_entries(&ctx.store).await.unwrap_err();
    match err {
        AdapterError::Backend(msg) => assert!(msg.contains("execution_time_ms")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_bootstrap_of_fresh_tables() {
    let Some(ctx) = TestContext::new().await else {
        return;
    };
    let layout = tidemark_core::StoreLayout::default()
        .with_ledger_name(format!("_tidemark_ledger_{}", ctx.table))
        .with_lock_name(format!("_tidemark_locks_{}", ctx.table));
    let first = PgAdapter::new(ctx.pool().clone()).with_layout(layout.clone());
    let second = PgAdapter::new(ctx.pool().clone()).with_layout(layout.clone());

    let (a, b) = tokio::join!(first.ensure_ledger(), second.ensure_ledger());
    a.unwrap();
    b.unwrap();
    let (a, b) = tokio::join!(first.ensure_locks(), second.ensure_locks());
    a.unwrap();
    b.unwrap();

    assert!(first.load_entries(&ctx.store).await.unwrap().is_empty());
    assert_eq!(second.get_lock(&ctx.store).await.unwrap(), None);
    for name in [&layout.ledger_name, &layout.lock_name] {
        let _ = sqlx::query(&format!("DROP TABLE IF EXISTS \"{name}\""))
            .execute(ctx.pool())
            .await;
    }
}

#[tokio::test]
async fn test_index_lookup_is_scoped_to_its_table() {
    let Some(ctx) = TestContext::new().await else {
        return;
    };
    let adapter: &dyn StoreAdapter = ctx.adapter.as_ref();
    let other = format!("{}_other", ctx.table);
    adapter
        .create_collection(&CollectionSpec::new(&ctx.table).column(FieldSpec::typed("a", "INT")))
        .await
        .unwrap();
    adapter
        .create_collection(&CollectionSpec::new(&other).column(FieldSpec::typed("b", "INT")))
        .await
        .unwrap();
    let name = format!("idx_{}_shared", ctx.table);
    adapter
        .create_index(&other, &IndexSpec::new().asc("b").named(&name))
        .await
        .unwrap();

    // The name is taken in the schema, but not by an index on this table.
    let err = adapter
        .create_index(&ctx.table, &IndexSpec::new().asc("a").named(&name))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AdapterError::AlreadyExists {
            kind: tidemark_core::ObjectKind::Index,
            ..
        }
    ));

    let _ = sqlx::query(&format!("DROP TABLE IF EXISTS \"{other}\" CASCADE"))
        .execute(ctx.pool())
        .await;
    ctx.cleanup().await;
}

#[tokio::test]
async fn test_lock_rows() {
    let Some(ctx) = TestContext::new().await else {
        return;
    };
    ctx.adapter.ensure_locks().await.unwrap();
    let now = tidemark_core::clock::truncate_millis(chrono::Utc::now());
    let record = tidemark_core::LockRecord {
        store: ctx.store.clone(),
        holder: ExecutionId::generate(),
        acquired_at: now,
        expires_at: now + chrono::Duration::seconds(60),
    };
    assert!(ctx.adapter.try_insert_lock(&record).await.unwrap());
    assert!(!ctx.adapter.try_insert_lock(&record).await.unwrap());
    assert_eq!(ctx.adapter.get_lock(&ctx.store).await.unwrap(), Some(record.clone()));

    let other = ExecutionId::generate();
    assert!(!ctx.adapter.remove_lock(&ctx.store, &other).await.unwrap());
    assert!(ctx.adapter.remove_lock(&ctx.store, &record.holder).await.unwrap());
    assert_eq!(ctx.adapter.get_lock(&ctx.store).await.unwrap(), None);
}
