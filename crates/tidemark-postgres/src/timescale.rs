//! TimescaleDB statement builders.
//!
//! Hypertables, continuous aggregates and their policies have no portable
//! DDL, so migrations issue them through `execute`. These helpers render the
//! `RawStatement`s.

use tidemark_core::RawStatement;

use crate::ddl::{quote_ident, quote_literal};

/// `CREATE EXTENSION IF NOT EXISTS`.
pub fn create_extension(name: &str) -> RawStatement {
    RawStatement::sql(format!("CREATE EXTENSION IF NOT EXISTS {}", quote_ident(name)))
}

/// `DROP EXTENSION IF EXISTS`.
pub fn drop_extension(name: &str) -> RawStatement {
    RawStatement::sql(format!("DROP EXTENSION IF EXISTS {}", quote_ident(name)))
}

/// Conversion of a plain table into a hypertable.
#[derive(Debug, Clone)]
pub struct Hypertable {
    table: String,
    time_column: String,
    chunk_interval: Option<String>,
    if_not_exists: bool,
}

impl Hypertable {
    /// Partition `table` by `time_column`.
    pub fn new(table: impl Into<String>, time_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            time_column: time_column.into(),
            chunk_interval: None,
            if_not_exists: true,
        }
    }

    /// Set the chunk interval, e.g. `1 day`.
    pub fn chunk_interval(mut self, interval: impl Into<String>) -> Self {
        self.chunk_interval = Some(interval.into());
        self
    }

    /// Fail if the table is already a hypertable.
    pub fn strict(mut self) -> Self {
        self.if_not_exists = false;
        self
    }

    /// Render the `create_hypertable` call.
    pub fn statement(&self) -> RawStatement {
        let mut sql = format!(
            "SELECT create_hypertable({}, {}",
            quote_literal(&self.table),
            quote_literal(&self.time_column)
        );
        if let Some(interval) = &self.chunk_interval {
            sql.push_str(&format!(
                ", chunk_time_interval => INTERVAL {}",
                quote_literal(interval)
            ));
        }
        if self.if_not_exists {
            sql.push_str(", if_not_exists => TRUE");
        }
        sql.push(')');
        RawStatement::sql(sql)
    }
}

/// Materialized view maintained by TimescaleDB.
#[derive(Debug, Clone)]
pub struct ContinuousAggregate {
    name: String,
    query: String,
    with_data: bool,
}

impl ContinuousAggregate {
    /// Aggregate `query` into the view `name`. The query should use `time_bucket`.
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            with_data: false,
        }
    }

    /// Populate the view on creation.
    pub fn with_data(mut self) -> Self {
        self.with_data = true;
        self
    }

    /// `CREATE MATERIALIZED VIEW ... WITH (timescaledb.continuous)`.
    pub fn create(&self) -> RawStatement {
        RawStatement::sql(format!(
            "CREATE MATERIALIZED VIEW {} WITH (timescaledb.continuous) AS {} WITH {}DATA",
            quote_ident(&self.name),
            self.query.trim(),
            if self.with_data { "" } else { "NO " }
        ))
    }

    /// `DROP MATERIALIZED VIEW IF EXISTS`.
    pub fn drop(&self) -> RawStatement {
        drop_materialized_view(&self.name)
    }
}

/// `DROP MATERIALIZED VIEW IF EXISTS`.
pub fn drop_materialized_view(name: &str) -> RawStatement {
    RawStatement::sql(format!("DROP MATERIALIZED VIEW IF EXISTS {}", quote_ident(name)))
}

/// Refresh schedule for a continuous aggregate.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    /// View to refresh.
    pub view: String,
    /// Oldest bucket refreshed, relative to now.
    pub start_offset: String,
    /// Newest bucket refreshed, relative to now.
    pub end_offset: String,
    /// How often the job runs.
    pub schedule_interval: String,
}

impl RefreshPolicy {
    /// `add_continuous_aggregate_policy`.
    pub fn add(&self) -> RawStatement {
        RawStatement::sql(format!(
            "SELECT add_continuous_aggregate_policy({}, start_offset => INTERVAL {}, \
             end_offset => INTERVAL {}, schedule_interval => INTERVAL {})",
            quote_literal(&self.view),
            quote_literal(&self.start_offset),
            quote_literal(&self.end_offset),
            quote_literal(&self.schedule_interval)
        ))
    }

    /// `remove_continuous_aggregate_policy`, tolerating a missing policy.
    pub fn remove(&self) -> RawStatement {
        RawStatement::sql(format!(
            "SELECT remove_continuous_aggregate_policy({}, if_exists => TRUE)",
            quote_literal(&self.view)
        ))
    }
}

/// `add_retention_policy`: drop chunks older than `interval`.
pub fn add_retention_policy(table: &str, interval: &str) -> RawStatement {
    RawStatement::sql(format!(
        "SELECT add_retention_policy({}, INTERVAL {})",
        quote_literal(table),
        quote_literal(interval)
    ))
}

/// `remove_retention_policy`, tolerating a missing policy.
pub fn remove_retention_policy(table: &str) -> RawStatement {
    RawStatement::sql(format!(
        "SELECT remove_retention_policy({}, if_exists => TRUE)",
        quote_literal(table)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(statement: RawStatement) -> String {
        match statement {
            RawStatement::Sql(sql) => sql,
            RawStatement::Command(_) => panic!("expected SQL"),
        }
    }

    #[test]
    fn test_hypertable() {
        let sql = text(
            Hypertable::new("metrics", "timestamp")
                .chunk_interval("1 day")
                .statement(),
        );
        assert_eq!(
            sql,
            "SELECT create_hypertable('metrics', 'timestamp', chunk_time_interval => INTERVAL '1 day', if_not_exists => TRUE)"
        );

        let strict = text(Hypertable::new("metrics", "timestamp").strict().statement());
        assert_eq!(strict, "SELECT create_hypertable('metrics', 'timestamp')");
    }

    #[test]
    fn test_continuous_aggregate() {
        let agg = ContinuousAggregate::new(
            "metrics_hourly",
            "SELECT name, time_bucket('1 hour', timestamp) AS bucket, COUNT(*) FROM metrics GROUP BY name, bucket",
        );
        let sql = text(agg.create());
        assert!(sql.starts_with("CREATE MATERIALIZED VIEW \"metrics_hourly\" WITH (timescaledb.continuous) AS SELECT"));
        assert!(sql.ends_with("WITH NO DATA"));
        assert!(text(agg.clone().with_data().create()).ends_with("GROUP BY name, bucket WITH DATA"));
        assert_eq!(
            text(agg.drop()),
            "DROP MATERIALIZED VIEW IF EXISTS \"metrics_hourly\""
        );
    }

    #[test]
    fn test_policies() {
        let policy = RefreshPolicy {
            view: "metrics_hourly".to_string(),
            start_offset: "3 hours".to_string(),
            end_offset: "1 hour".to_string(),
            schedule_interval: "1 hour".to_string(),
        };
        assert_eq!(
            text(policy.add()),
            "SELECT add_continuous_aggregate_policy('metrics_hourly', start_offset => INTERVAL '3 hours', \
             end_offset => INTERVAL '1 hour', schedule_interval => INTERVAL '1 hour')"
        );
        assert_eq!(
            text(add_retention_policy("metrics", "30 days")),
            "SELECT add_retention_policy('metrics', INTERVAL '30 days')"
        );
        assert_eq!(
            text(create_extension("timescaledb")),
            "CREATE EXTENSION IF NOT EXISTS \"timescaledb\""
        );
    }
}
