//! `1704000000002_add-aquarium-analytics-fields`

use serde_json::json;
use tidemark::{
    async_trait, AdapterResult, CollectionSpec, DropOptions, FieldSpec, IndexSpec, Migration,
    StoreAdapter, Version,
};

const COLLECTION: &str = "aquariums";

fn analytics_field() -> FieldSpec {
    FieldSpec::new("analytics").with_default(json!({
        "viewCount": 0,
        "lastViewedAt": null,
        "shareCount": 0,
        "favoriteCount": 0,
    }))
}

fn trends_field() -> FieldSpec {
    let stable = json!({ "trend": "stable", "lastValue": null });
    FieldSpec::new("parameterTrends").with_default(json!({
        "temperature": stable,
        "ph": stable,
        "ammonia": stable,
        "nitrite": stable,
        "nitrate": stable,
    }))
}

fn indexes() -> [IndexSpec; 4] {
    [
        IndexSpec::new().desc("analytics.viewCount"),
        IndexSpec::new().desc("analytics.lastViewedAt"),
        IndexSpec::new().desc("analytics.favoriteCount"),
        IndexSpec::new()
            .asc("isPublic")
            .desc("analytics.viewCount")
            .desc("analytics.favoriteCount"),
    ]
}

/// Analytics counters and parameter trends on every aquarium.
///
/// Backfills only touch documents missing the field, so a partial run can
/// be repeated.
pub struct AddAquariumAnalyticsFields;

#[async_trait]
impl Migration for AddAquariumAnalyticsFields {
    fn version(&self) -> Version {
        Version::new(1704000000002)
    }

    fn name(&self) -> &str {
        "add-aquarium-analytics-fields"
    }

    fn description(&self) -> Option<&str> {
        Some("Add analytics tracking fields to aquarium collection")
    }

    async fn up(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()> {
        adapter
            .create_collection(&CollectionSpec::new(COLLECTION).if_not_exists())
            .await?;
        let backfilled = adapter.add_field(COLLECTION, &analytics_field()).await?;
        tracing::info!(collection = COLLECTION, documents = backfilled, "Backfilled analytics");
        adapter.add_field(COLLECTION, &trends_field()).await?;

        for spec in indexes() {
            adapter.create_index(COLLECTION, &spec.if_not_exists()).await?;
        }
        Ok(())
    }

    async fn down(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()> {
        let options = DropOptions::if_exists();
        adapter.remove_field(COLLECTION, "analytics", &options).await?;
        adapter
            .remove_field(COLLECTION, "parameterTrends", &options)
            .await?;
        for spec in indexes() {
            adapter
                .drop_index(COLLECTION, &spec.document_default_name(), &options)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tidemark::{MemoryStore, MigrationRegistry, MigrationRunner, RunnerConfig, StoreId};

    #[tokio::test]
    async fn test_backfill_keeps_existing_values() {
        let store = Arc::new(MemoryStore::document());
        store
            .create_collection(&CollectionSpec::new(COLLECTION))
            .await
            .unwrap();
        store
            .insert_documents(
                COLLECTION,
                vec![
                    json!({ "name": "reef" }),
                    json!({ "name": "planted", "analytics": { "viewCount": 7 } }),
                ],
            )
            .unwrap();

        let registry = MigrationRegistry::builder(StoreId::new("aquarium-service/mongodb").unwrap())
            .register(AddAquariumAnalyticsFields)
            .build()
            .unwrap();
        let runner = MigrationRunner::new(registry, Arc::clone(&store), RunnerConfig::default()).unwrap();
        runner.migrate_up(None).await.unwrap();

        let docs = store.documents(COLLECTION);
        assert_eq!(docs[0]["analytics"]["viewCount"], 0);
        assert_eq!(docs[0]["parameterTrends"]["ph"]["trend"], "stable");
        assert_eq!(docs[1]["analytics"]["viewCount"], 7);
        assert!(store.has_index(
            COLLECTION,
            "isPublic_1_analytics.viewCount_-1_analytics.favoriteCount_-1"
        ));

        runner.rollback_last().await.unwrap();
        let docs = store.documents(COLLECTION);
        assert!(docs.iter().all(|d| d.get("analytics").is_none()));
        assert!(!store.has_index(COLLECTION, "analytics.viewCount_-1"));
    }
}
