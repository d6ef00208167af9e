//! Migration skeletons for `create`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tidemark_core::{MigrationId, StoreKind, Version};

use crate::error::CliError;

/// Turn `add-user-indexes` into `add_user_indexes`.
pub fn module_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// Turn `add-user-indexes` into `AddUserIndexes`.
pub fn type_name(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn body(kind: StoreKind) -> (&'static str, &'static str) {
    match kind {
        StoreKind::Relational => (
            "        adapter\n            .execute(&RawStatement::sql(\"CREATE TABLE example (id BIGINT PRIMARY KEY)\"))\n            .await?;\n        Ok(())",
            "        adapter\n            .execute(&RawStatement::sql(\"DROP TABLE IF EXISTS example\"))\n            .await?;\n        Ok(())",
        ),
        StoreKind::Document => (
            "        adapter\n            .create_index(\"collection\", &IndexSpec::new().asc(\"field\"))\n            .await?;\n        Ok(())",
            "        adapter\n            .drop_index(\"collection\", \"field_1\", &DropOptions::if_exists())\n            .await?;\n        Ok(())",
        ),
    }
}

/// Render the skeleton source for a migration.
pub fn render(id: &MigrationId, kind: StoreKind) -> String {
    let (up, down) = body(kind);
    let imports = match kind {
        StoreKind::Relational => "RawStatement",
        StoreKind::Document => "DropOptions, IndexSpec",
    };
    format!(
        "//! {id}\n\
         \n\
         use tidemark::{{async_trait, AdapterResult, Migration, StoreAdapter, Version, {imports}}};\n\
         \n\
         pub struct {ty};\n\
         \n\
         #[async_trait]\n\
         impl Migration for {ty} {{\n\
         \x20   fn version(&self) -> Version {{\n\
         \x20       Version::new({version})\n\
         \x20   }}\n\
         \n\
         \x20   fn name(&self) -> &str {{\n\
         \x20       \"{name}\"\n\
         \x20   }}\n\
         \n\
         \x20   async fn up(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()> {{\n\
         {up}\n\
         \x20   }}\n\
         \n\
         \x20   async fn down(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()> {{\n\
         {down}\n\
         \x20   }}\n\
         }}\n",
        ty = type_name(&id.name),
        version = id.version,
        name = id.name,
    )
}

/// Write `m<timestamp>_<name>.rs` into `dir` and return its path.
///
/// The version is the current time in milliseconds, matching the
/// `<timestamp>_<name>` convention.
pub fn create_migration(
    dir: &Path,
    name: &str,
    kind: StoreKind,
    now: DateTime<Utc>,
) -> Result<PathBuf, CliError> {
    if name.trim().is_empty() {
        return Err(CliError::InvalidArgument(
            "migration name must not be empty".to_string(),
        ));
    }
    let millis = u64::try_from(now.timestamp_millis())
        .map_err(|_| CliError::InvalidArgument(format!("clock before epoch: {now}")))?;
    let id = MigrationId::new(Version::new(millis), name.trim());

    fs::create_dir_all(dir)?;
    let path = dir.join(format!("m{}_{}.rs", id.version, module_name(&id.name)));
    if path.exists() {
        return Err(CliError::InvalidArgument(format!(
            "{} already exists",
            path.display()
        )));
    }
    fs::write(&path, render(&id, kind))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_names() {
        assert_eq!(module_name("add-user-indexes"), "add_user_indexes");
        assert_eq!(type_name("add-user-indexes"), "AddUserIndexes");
        assert_eq!(type_name("create metrics_hypertable"), "CreateMetricsHypertable");
    }

    #[test]
    fn test_render_document_skeleton() {
        let id = MigrationId::new(Version::new(1704000000000), "add-user-indexes");
        let source = render(&id, StoreKind::Document);
        assert!(source.starts_with("//! 1704000000000_add-user-indexes\n"));
        assert!(source.contains("pub struct AddUserIndexes;"));
        assert!(source.contains("Version::new(1704000000000)"));
        assert!(source.contains("create_index(\"collection\""));
        assert!(source.contains("    fn name(&self) -> &str {\n        \"add-user-indexes\"\n    }"));
    }

    #[test]
    fn test_create_writes_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.timestamp_millis_opt(1_704_000_000_001).unwrap();
        let path = create_migration(
            dir.path(),
            "create-metrics-hypertable",
            StoreKind::Relational,
            now,
        )
        .unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "m1704000000001_create_metrics_hypertable.rs"
        );
        let source = fs::read_to_string(&path).unwrap();
        assert!(source.contains("RawStatement::sql"));

        let err = create_migration(dir.path(), "create-metrics-hypertable", StoreKind::Relational, now)
            .unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
    }
}
