//! `1704000000000_add-user-indexes`

use tidemark::{CollectionSpec, DropOptions, IndexSpec, Operation, ScriptedMigration};

fn user_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::new().asc("email").unique(),
        IndexSpec::new().asc("username").unique(),
        IndexSpec::new().desc("createdAt"),
        IndexSpec::new().desc("lastLoginAt"),
        IndexSpec::new().asc("subscription.status"),
        IndexSpec::new().asc("email").asc("isActive"),
        IndexSpec::new().text("firstName").text("lastName").text("email"),
    ]
}

/// Lookup, login and search indexes on `users`.
///
/// The collection is created if missing and left in place on the way down.
pub fn add_user_indexes() -> ScriptedMigration {
    let mut migration = ScriptedMigration::new(1704000000000u64, "add-user-indexes")
        .describe("Add indexes for user collection performance optimization")
        .with_up(Operation::CreateCollection {
            spec: CollectionSpec::new("users").if_not_exists(),
        });
    for spec in user_indexes() {
        migration = migration.with_down(Operation::DropIndex {
            target: "users".to_string(),
            name: spec.document_default_name(),
            options: DropOptions::if_exists(),
        });
        migration = migration.with_up(Operation::CreateIndex {
            target: "users".to_string(),
            spec,
        });
    }
    migration
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tidemark::{MemoryStore, MigrationRegistry, MigrationRunner, RunnerConfig, StoreId};

    #[tokio::test]
    async fn test_indexes_created_and_dropped() {
        let store = Arc::new(MemoryStore::document());
        let registry = MigrationRegistry::builder(StoreId::new("user-service/mongodb").unwrap())
            .register(add_user_indexes())
            .build()
            .unwrap();
        let runner = MigrationRunner::new(registry, Arc::clone(&store), RunnerConfig::default()).unwrap();

        runner.migrate_up(None).await.unwrap();
        for name in [
            "email_1",
            "username_1",
            "createdAt_-1",
            "lastLoginAt_-1",
            "subscription.status_1",
            "email_1_isActive_1",
            "firstName_text_lastName_text_email_text",
        ] {
            assert!(store.has_index("users", name), "missing {name}");
        }

        runner.rollback_last().await.unwrap();
        assert!(store.has_collection("users"));
        assert!(!store.has_index("users", "email_1"));
        assert!(!store.has_index("users", "firstName_text_lastName_text_email_text"));
    }
}
