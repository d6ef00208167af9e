//! SQL rendering for relational schema operations.
//!
//! Every function here is pure: it turns a spec into statement text and
//! never touches a connection. Identifiers are always double-quoted, and a
//! dotted name such as `analytics.metrics` is quoted per part.

use serde_json::Value;
use tidemark_core::{
    AdapterError, AdapterResult, CollectionSpec, DropOptions, FieldDefault, FieldSpec, IndexOrder,
    IndexSpec, Predicate, StoreKind,
};

/// Quote an identifier, splitting on `.` for schema-qualified names.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Quote a string literal.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Render a JSON value as a SQL literal.
pub fn json_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_literal(s),
        Value::Array(_) | Value::Object(_) => format!("{}::jsonb", quote_literal(&value.to_string())),
    }
}

/// Schema part of a qualified table name, if any.
pub fn schema_of(table: &str) -> Option<&str> {
    table.rsplit_once('.').map(|(schema, _)| schema)
}

/// Column definition as used in `CREATE TABLE` and `ADD COLUMN`.
pub fn column_definition(field: &FieldSpec) -> AdapterResult<String> {
    let data_type = field.data_type.as_deref().ok_or_else(|| {
        AdapterError::InvalidDefinition(format!("column {} has no type", field.name))
    })?;

    let mut sql = format!("{} {}", quote_ident(&field.name), data_type);
    if !field.nullable {
        sql.push_str(" NOT NULL");
    }
    match &field.default {
        Some(FieldDefault::Value(value)) => {
            sql.push_str(" DEFAULT ");
            sql.push_str(&json_literal(value));
        }
        Some(FieldDefault::Expression(expr)) => {
            sql.push_str(" DEFAULT ");
            sql.push_str(expr);
        }
        None => {}
    }
    Ok(sql)
}

/// `CREATE TABLE`.
pub fn create_table(spec: &CollectionSpec) -> AdapterResult<String> {
    if spec.columns.is_empty() {
        return Err(AdapterError::InvalidDefinition(format!(
            "table {} needs at least one column",
            spec.name
        )));
    }

    let mut parts = spec
        .columns
        .iter()
        .map(column_definition)
        .collect::<AdapterResult<Vec<_>>>()?;
    if !spec.primary_key.is_empty() {
        let cols: Vec<_> = spec.primary_key.iter().map(|c| quote_ident(c)).collect();
        parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE {}{} ({})",
        if spec.if_not_exists { "IF NOT EXISTS " } else { "" },
        quote_ident(&spec.name),
        parts.join(", ")
    ))
}

/// `DROP TABLE`.
pub fn drop_table(name: &str, options: &DropOptions) -> String {
    format!(
        "DROP TABLE {}{}{}",
        if options.if_exists { "IF EXISTS " } else { "" },
        quote_ident(name),
        if options.cascade { " CASCADE" } else { "" }
    )
}

/// `CREATE INDEX` under an already resolved name.
///
/// `concurrently` is only honored for background indexes; callers pass
/// `false` inside a unit of work, where Postgres forbids it.
pub fn create_index(
    table: &str,
    name: &str,
    spec: &IndexSpec,
    concurrently: bool,
) -> AdapterResult<String> {
    if spec.keys.is_empty() {
        return Err(AdapterError::InvalidDefinition(
            "index needs at least one key".to_string(),
        ));
    }

    let mut cols = Vec::with_capacity(spec.keys.len());
    for key in &spec.keys {
        match key.order {
            IndexOrder::Asc => cols.push(quote_ident(&key.field)),
            IndexOrder::Desc => cols.push(format!("{} DESC", quote_ident(&key.field))),
            IndexOrder::Text => {
                return Err(AdapterError::Unsupported {
                    operation: "text index key",
                    store: StoreKind::Relational,
                })
            }
        }
    }

    let mut sql = String::from("CREATE ");
    if spec.unique {
        sql.push_str("UNIQUE ");
    }
    sql.push_str("INDEX ");
    if concurrently && spec.background {
        sql.push_str("CONCURRENTLY ");
    }
    if spec.if_not_exists {
        sql.push_str("IF NOT EXISTS ");
    }
    sql.push_str(&quote_ident(name));
    sql.push_str(" ON ");
    sql.push_str(&quote_ident(table));
    if let Some(method) = &spec.method {
        sql.push_str(" USING ");
        sql.push_str(method);
    }
    sql.push_str(&format!(" ({})", cols.join(", ")));

    match &spec.partial {
        Some(Predicate::Sql(predicate)) => {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
        Some(Predicate::Document(_)) => {
            return Err(AdapterError::InvalidDefinition(
                "relational partial indexes take a SQL predicate".to_string(),
            ))
        }
        None => {}
    }
    Ok(sql)
}

/// `DROP INDEX`. Indexes live in their table's schema, so `table` qualifies the name.
pub fn drop_index(table: &str, name: &str, options: &DropOptions) -> String {
    let qualified = match schema_of(table) {
        Some(schema) => format!("{schema}.{name}"),
        None => name.to_string(),
    };
    format!(
        "DROP INDEX {}{}{}",
        if options.if_exists { "IF EXISTS " } else { "" },
        quote_ident(&qualified),
        if options.cascade { " CASCADE" } else { "" }
    )
}

/// `ALTER TABLE ... ADD COLUMN`.
pub fn add_column(table: &str, field: &FieldSpec) -> AdapterResult<String> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {}{}",
        quote_ident(table),
        if field.if_not_exists { "IF NOT EXISTS " } else { "" },
        column_definition(field)?
    ))
}

/// `ALTER TABLE ... DROP COLUMN`.
pub fn drop_column(table: &str, name: &str, options: &DropOptions) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}{}{}",
        quote_ident(table),
        if options.if_exists { "IF EXISTS " } else { "" },
        quote_ident(name),
        if options.cascade { " CASCADE" } else { "" }
    )
}

/// `ALTER TABLE ... RENAME COLUMN`.
pub fn rename_column(table: &str, from: &str, to: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote_ident(table),
        quote_ident(from),
        quote_ident(to)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("analytics.metrics"), "\"analytics\".\"metrics\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_json_literal() {
        assert_eq!(json_literal(&json!(null)), "NULL");
        assert_eq!(json_literal(&json!(true)), "TRUE");
        assert_eq!(json_literal(&json!(42)), "42");
        assert_eq!(json_literal(&json!("o'neil")), "'o''neil'");
        assert_eq!(json_literal(&json!({})), "'{}'::jsonb");
    }

    #[test]
    fn test_create_table() {
        let spec = CollectionSpec::new("metrics")
            .column(FieldSpec::typed("id", "UUID").with_default_expression("gen_random_uuid()"))
            .column(FieldSpec::typed("name", "VARCHAR(255)").not_null())
            .column(FieldSpec::typed("tags", "JSONB").with_default(json!({})))
            .column(FieldSpec::typed("timestamp", "TIMESTAMPTZ").not_null())
            .primary_key(["id", "timestamp"])
            .if_not_exists();
        assert_eq!(
            create_table(&spec).unwrap(),
            "CREATE TABLE IF NOT EXISTS \"metrics\" (\"id\" UUID DEFAULT gen_random_uuid(), \
             \"name\" VARCHAR(255) NOT NULL, \"tags\" JSONB DEFAULT '{}'::jsonb, \
             \"timestamp\" TIMESTAMPTZ NOT NULL, PRIMARY KEY (\"id\", \"timestamp\"))"
        );
    }

    #[test]
    fn test_create_table_requires_types() {
        let spec = CollectionSpec::new("t").column(FieldSpec::new("untyped"));
        assert!(matches!(
            create_table(&spec),
            Err(AdapterError::InvalidDefinition(_))
        ));
        assert!(create_table(&CollectionSpec::new("empty")).is_err());
    }

    #[test]
    fn test_create_index_variants() {
        let spec = IndexSpec::new().asc("name").desc("timestamp");
        assert_eq!(
            create_index("metrics", "idx_metrics_name_timestamp", &spec, true).unwrap(),
            "CREATE INDEX \"idx_metrics_name_timestamp\" ON \"metrics\" (\"name\", \"timestamp\" DESC)"
        );

        let spec = IndexSpec::new()
            .asc("email")
            .unique()
            .background()
            .if_not_exists()
            .partial(Predicate::Sql("deleted_at IS NULL".to_string()));
        assert_eq!(
            create_index("users", "idx_users_email", &spec, true).unwrap(),
            "CREATE UNIQUE INDEX CONCURRENTLY IF NOT EXISTS \"idx_users_email\" ON \"users\" \
             (\"email\") WHERE deleted_at IS NULL"
        );

        let gin = IndexSpec::new().asc("tags").using("GIN");
        assert_eq!(
            create_index("metrics", "idx_metrics_tags_gin", &gin, false).unwrap(),
            "CREATE INDEX \"idx_metrics_tags_gin\" ON \"metrics\" USING GIN (\"tags\")"
        );
    }

    #[test]
    fn test_concurrently_only_outside_unit() {
        let spec = IndexSpec::new().asc("email").background();
        let sql = create_index("users", "idx", &spec, false).unwrap();
        assert!(!sql.contains("CONCURRENTLY"));
    }

    #[test]
    fn test_create_index_rejects_document_shapes() {
        let text = IndexSpec::new().text("bio");
        assert!(matches!(
            create_index("users", "idx", &text, false),
            Err(AdapterError::Unsupported { .. })
        ));

        let partial = IndexSpec::new()
            .asc("email")
            .partial(Predicate::Document(json!({"deleted": false})));
        assert!(matches!(
            create_index("users", "idx", &partial, false),
            Err(AdapterError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_drop_statements() {
        assert_eq!(
            drop_table("metrics", &DropOptions::if_exists().cascade()),
            "DROP TABLE IF EXISTS \"metrics\" CASCADE"
        );
        assert_eq!(
            drop_index("analytics.metrics", "idx_a", &DropOptions::strict()),
            "DROP INDEX \"analytics\".\"idx_a\""
        );
        assert_eq!(
            drop_column("users", "phone", &DropOptions::if_exists()),
            "ALTER TABLE \"users\" DROP COLUMN IF EXISTS \"phone\""
        );
    }

    #[test]
    fn test_column_changes() {
        let field = FieldSpec::typed("phone", "TEXT").if_not_exists();
        assert_eq!(
            add_column("users", &field).unwrap(),
            "ALTER TABLE \"users\" ADD COLUMN IF NOT EXISTS \"phone\" TEXT"
        );
        assert_eq!(
            rename_column("users", "phone", "mobile"),
            "ALTER TABLE \"users\" RENAME COLUMN \"phone\" TO \"mobile\""
        );
    }
}
