//! `1704000000001_create-metrics-hypertable`

use tidemark::postgres::timescale::{
    add_retention_policy, create_extension, ContinuousAggregate, Hypertable, RefreshPolicy,
};
use tidemark::{
    async_trait, AdapterResult, CollectionSpec, DropOptions, FieldSpec, IndexSpec, Migration,
    StoreAdapter, Version,
};

const HOURLY_QUERY: &str = "\
SELECT name, tags, time_bucket('1 hour', timestamp) AS bucket, \
COUNT(*) AS count, AVG(value) AS avg_value, MIN(value) AS min_value, \
MAX(value) AS max_value, SUM(value) AS sum_value \
FROM metrics GROUP BY name, tags, bucket";

fn metrics_table() -> CollectionSpec {
    CollectionSpec::new("metrics")
        .column(FieldSpec::typed("id", "UUID").with_default_expression("gen_random_uuid()"))
        .column(FieldSpec::typed("name", "VARCHAR(255)").not_null())
        .column(FieldSpec::typed("type", "VARCHAR(50)").not_null())
        .column(FieldSpec::typed("value", "NUMERIC(20, 6)").not_null())
        .column(FieldSpec::typed("tags", "JSONB").with_default(serde_json::json!({})))
        .column(FieldSpec::typed("timestamp", "TIMESTAMPTZ").not_null())
        .column(FieldSpec::typed("aggregation_period", "VARCHAR(50)"))
        .column(FieldSpec::typed("metadata", "JSONB"))
        .column(
            FieldSpec::typed("created_at", "TIMESTAMPTZ")
                .with_default_expression("CURRENT_TIMESTAMP"),
        )
        .primary_key(["id", "timestamp"])
        .if_not_exists()
}

fn hourly() -> ContinuousAggregate {
    ContinuousAggregate::new("metrics_hourly", HOURLY_QUERY)
}

/// Metrics table as a TimescaleDB hypertable with an hourly rollup.
///
/// The down step leaves the extension installed since other tables may use it.
pub struct CreateMetricsHypertable;

#[async_trait]
impl Migration for CreateMetricsHypertable {
    fn version(&self) -> Version {
        Version::new(1704000000001)
    }

    fn name(&self) -> &str {
        "create-metrics-hypertable"
    }

    fn description(&self) -> Option<&str> {
        Some("Create TimescaleDB hypertable for metrics")
    }

    fn fingerprint(&self) -> String {
        format!("{}:{:?}:{HOURLY_QUERY}", self.id(), metrics_table())
    }

    async fn up(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()> {
        adapter.execute(&create_extension("timescaledb")).await?;
        adapter.create_collection(&metrics_table()).await?;
        adapter
            .execute(&Hypertable::new("metrics", "timestamp").chunk_interval("1 day").statement())
            .await?;

        adapter
            .create_index(
                "metrics",
                &IndexSpec::new()
                    .asc("name")
                    .asc("timestamp")
                    .named("idx_metrics_name_timestamp"),
            )
            .await?;
        adapter
            .create_index("metrics", &IndexSpec::new().asc("tags").named("idx_metrics_tags"))
            .await?;
        adapter
            .create_index(
                "metrics",
                &IndexSpec::new()
                    .asc("tags")
                    .using("GIN")
                    .named("idx_metrics_tags_gin"),
            )
            .await?;

        adapter.execute(&hourly().create()).await?;
        let refresh = RefreshPolicy {
            view: "metrics_hourly".to_string(),
            start_offset: "3 hours".to_string(),
            end_offset: "1 hour".to_string(),
            schedule_interval: "1 hour".to_string(),
        };
        adapter.execute(&refresh.add()).await?;
        adapter
            .execute(&add_retention_policy("metrics", "30 days"))
            .await?;
        Ok(())
    }

    async fn down(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()> {
        adapter.execute(&hourly().drop()).await?;
        adapter
            .drop_collection("metrics", &DropOptions::if_exists())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tidemark::{MemoryStore, MigrationRegistry, MigrationRunner, RawStatement, RunnerConfig, StoreId};

    fn runner(store: &Arc<MemoryStore>) -> MigrationRunner {
        let registry = MigrationRegistry::builder(StoreId::new("analytics-service/postgres").unwrap())
            .register(CreateMetricsHypertable)
            .build()
            .unwrap();
        MigrationRunner::new(registry, Arc::clone(store), RunnerConfig::default()).unwrap()
    }

    fn sql(statement: &RawStatement) -> &str {
        match statement {
            RawStatement::Sql(sql) => sql,
            RawStatement::Command(_) => panic!("unexpected command"),
        }
    }

    #[tokio::test]
    async fn test_up_issues_timescale_statements_in_order() {
        let store = Arc::new(MemoryStore::relational());
        runner(&store).migrate_up(None).await.unwrap();

        assert!(store.has_collection("metrics"));
        assert!(store.has_index("metrics", "idx_metrics_tags_gin"));
        let executed = store.executed();
        let statements: Vec<&str> = executed.iter().map(sql).collect();
        assert_eq!(statements.len(), 5);
        assert!(statements[0].starts_with("CREATE EXTENSION IF NOT EXISTS"));
        assert!(statements[1].contains("chunk_time_interval => INTERVAL '1 day'"));
        assert!(statements[2].contains("WITH (timescaledb.continuous)"));
        assert!(statements[3].contains("add_continuous_aggregate_policy('metrics_hourly'"));
        assert_eq!(
            statements[4],
            "SELECT add_retention_policy('metrics', INTERVAL '30 days')"
        );
    }

    #[tokio::test]
    async fn test_down_drops_view_then_table() {
        let store = Arc::new(MemoryStore::relational());
        let runner = runner(&store);
        runner.migrate_up(None).await.unwrap();
        runner.rollback_last().await.unwrap();

        assert!(!store.has_collection("metrics"));
        let executed = store.executed();
        let last = executed.last().map(sql).unwrap();
        assert_eq!(last, "DROP MATERIALIZED VIEW IF EXISTS \"metrics_hourly\"");
    }
}
