//! End-to-end command tests against the in-memory store.

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tidemark_core::{
    CollectionSpec, ExecutionId, FieldSpec, IndexSpec, LockRecord, MemoryStore, MigrationError,
    MigrationRegistry, MigrationRunner, Operation, RunnerConfig, ScriptedMigration, StoreId,
};
use tidemark_cli::{execute, Cli, CliError};

const STORE: &str = "users-service/memory";

struct TestContext {
    store: Arc<MemoryStore>,
}

impl TestContext {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::relational()),
        }
    }

    fn registry() -> MigrationRegistry {
        MigrationRegistry::builder(StoreId::new(STORE).unwrap())
            .register(
                ScriptedMigration::new(1u64, "create users")
                    .with_up(Operation::CreateCollection {
                        spec: CollectionSpec::new("users")
                            .column(FieldSpec::typed("id", "BIGINT").not_null())
                            .primary_key(["id"]),
                    })
                    .reversible()
                    .unwrap(),
            )
            .register(
                ScriptedMigration::new(2u64, "add email")
                    .with_up(Operation::AddField {
                        target: "users".to_string(),
                        field: FieldSpec::typed("email", "TEXT"),
                    })
                    .with_up(Operation::CreateIndex {
                        target: "users".to_string(),
                        spec: IndexSpec::new().asc("email").named("idx_users_email"),
                    })
                    .reversible()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    async fn run(&self, args: &[&str]) -> Result<String, CliError> {
        let mut argv = vec!["tidemark", "--lock-attempts", "1"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        let config = cli.into_config(RunnerConfig::default()).unwrap();
        let runner = MigrationRunner::new(Self::registry(), Arc::clone(&self.store), config).unwrap();
        execute(&cli, &runner).await
    }
}

#[tokio::test]
async fn test_up_then_status() {
    let ctx = TestContext::new();

    let out = ctx.run(&["up"]).await.unwrap();
    assert!(out.contains("ran 2 migration(s), none -> 2"), "{out}");
    assert!(ctx.store.has_index("users", "idx_users_email"));

    let again = ctx.run(&["up"]).await.unwrap();
    assert!(again.contains("nothing to do"), "{again}");

    let json = ctx.run(&["status", "--json"]).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["current_version"], 2);
    assert_eq!(value["latest_version"], 2);
    assert_eq!(value["applied"].as_array().unwrap().len(), 2);
    assert!(value["pending"].as_array().unwrap().is_empty());

    let text = ctx.run(&["status"]).await.unwrap();
    assert!(text.contains("add email"), "{text}");
}

#[tokio::test]
async fn test_plan_and_dry_run_leave_store_untouched() {
    let ctx = TestContext::new();

    let plan = ctx.run(&["plan", "--to", "1"]).await.unwrap();
    assert!(plan.contains("would run 1 migration(s)"), "{plan}");

    let dry = ctx.run(&["--dry-run", "up"]).await.unwrap();
    assert!(dry.contains("would run 2 migration(s)"), "{dry}");
    assert!(!ctx.store.has_collection("users"));
    assert!(ctx.store.ledger_entries().is_empty());
}

#[tokio::test]
async fn test_down_and_rollback() {
    let ctx = TestContext::new();
    ctx.run(&["up"]).await.unwrap();

    let out = ctx.run(&["rollback"]).await.unwrap();
    assert!(out.contains("2 -> 1"), "{out}");
    assert!(!ctx.store.has_index("users", "idx_users_email"));

    let out = ctx.run(&["down", "--to", "0"]).await.unwrap();
    assert!(out.contains("1 -> none"), "{out}");
    assert!(!ctx.store.has_collection("users"));
}

#[tokio::test]
async fn test_store_flag_must_match_registry() {
    let ctx = TestContext::new();
    let err = ctx
        .run(&["--store", "billing-service/memory", "up"])
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::InvalidArgument(_)));
    assert_eq!(err.status(), 1);

    ctx.run(&["--store", STORE, "up"]).await.unwrap();
}

#[tokio::test]
async fn test_live_lock_exits_with_lock_status() {
    let ctx = TestContext::new();
    let now = Utc::now();
    ctx.store.put_lock(LockRecord {
        store: StoreId::new(STORE).unwrap(),
        holder: ExecutionId::from_string("exec-other"),
        acquired_at: now,
        expires_at: now + chrono::Duration::minutes(5),
    });

    let err = ctx.run(&["up"]).await.unwrap_err();
    assert!(matches!(
        err,
        CliError::Migration(MigrationError::LockHeld { .. })
    ));
    assert_eq!(err.status(), 2);
}

#[tokio::test]
async fn test_create_writes_skeleton() {
    let dir = tempfile::tempdir().unwrap();
    let cli = Cli::try_parse_from([
        "tidemark",
        "create",
        "add-user-indexes",
        "--kind",
        "document",
        "--dir",
        dir.path().to_str().unwrap(),
    ])
    .unwrap();
    let args = match &cli.command {
        tidemark_cli::Command::Create(args) => args,
        other => panic!("unexpected {other:?}"),
    };
    let path = tidemark_cli::create(args).unwrap();
    assert!(path.starts_with(dir.path()));
    let body = std::fs::read_to_string(&path).unwrap();
    assert!(body.contains("add-user-indexes"));
}
