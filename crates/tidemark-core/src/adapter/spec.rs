//! Store-neutral definitions passed to adapter operations.

use serde::{Deserialize, Serialize};

/// Default value for a new column or document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldDefault {
    /// A literal, written as-is into existing documents or rendered as a SQL literal.
    Value(serde_json::Value),
    /// A raw SQL expression such as `CURRENT_TIMESTAMP`. Relational stores only.
    Expression(String),
}

/// A column (relational) or field (document).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Column or field name. Dotted paths are allowed for documents.
    pub name: String,
    /// SQL type, e.g. `VARCHAR(255)`. Required by relational stores, ignored by document stores.
    pub data_type: Option<String>,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Value given to existing rows/documents.
    pub default: Option<FieldDefault>,
    /// Succeed without changes if the field already exists.
    pub if_not_exists: bool,
}

impl FieldSpec {
    /// An untyped, nullable field. Enough for document stores.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            nullable: true,
            default: None,
            if_not_exists: false,
        }
    }

    /// A typed, nullable column.
    pub fn typed(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self::new(name).with_type(data_type)
    }

    /// Set the SQL type.
    pub fn with_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    /// Disallow NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Default to a literal value.
    pub fn with_default(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default = Some(FieldDefault::Value(value.into()));
        self
    }

    /// Default to a SQL expression.
    pub fn with_default_expression(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(FieldDefault::Expression(expression.into()));
        self
    }

    /// Make creation idempotent.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }
}

/// Definition of a table or collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    /// Table or collection name.
    pub name: String,
    /// Columns. Ignored by document stores.
    pub columns: Vec<FieldSpec>,
    /// Primary key columns. Ignored by document stores.
    pub primary_key: Vec<String>,
    /// Store-specific creation options, e.g. document time-series settings.
    pub options: Option<serde_json::Value>,
    /// Succeed without changes if the collection already exists.
    pub if_not_exists: bool,
}

impl CollectionSpec {
    /// A collection with no columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            options: None,
            if_not_exists: false,
        }
    }

    /// Add a column.
    pub fn column(mut self, column: FieldSpec) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key.
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set store-specific options.
    pub fn options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Make creation idempotent.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }
}

/// Flags for drop/remove operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropOptions {
    /// Succeed without changes if the object is absent.
    pub if_exists: bool,
    /// Drop dependent objects too (relational only).
    pub cascade: bool,
}

impl DropOptions {
    /// Fail with `NotFound` when the object is absent.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Succeed when the object is absent.
    pub fn if_exists() -> Self {
        Self {
            if_exists: true,
            cascade: false,
        }
    }

    /// Also drop dependent objects.
    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }
}

/// Ordering of one index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
    /// Full-text.
    Text,
}

impl IndexOrder {
    /// Suffix used in document-store default index names.
    fn name_suffix(self) -> &'static str {
        match self {
            IndexOrder::Asc => "1",
            IndexOrder::Desc => "-1",
            IndexOrder::Text => "text",
        }
    }
}

/// One key of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    /// Column or field path.
    pub field: String,
    /// Ordering.
    pub order: IndexOrder,
}

/// Partial-index predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// SQL `WHERE` clause body.
    Sql(String),
    /// Document filter expression.
    Document(serde_json::Value),
}

/// Definition of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Explicit name. Adapters derive one when absent.
    pub name: Option<String>,
    /// Keys in order.
    pub keys: Vec<IndexKey>,
    /// Enforce uniqueness.
    pub unique: bool,
    /// Only index rows/documents matching this predicate.
    pub partial: Option<Predicate>,
    /// Build without blocking writes where the store supports it.
    pub background: bool,
    /// Access method, e.g. `GIN` (relational only).
    pub method: Option<String>,
    /// Succeed without changes if an identical index exists.
    pub if_not_exists: bool,
}

impl IndexSpec {
    /// An empty index definition.
    pub fn new() -> Self {
        Self {
            name: None,
            keys: Vec::new(),
            unique: false,
            partial: None,
            background: false,
            method: None,
            if_not_exists: false,
        }
    }

    /// Add an ascending key.
    pub fn asc(self, field: impl Into<String>) -> Self {
        self.key(field, IndexOrder::Asc)
    }

    /// Add a descending key.
    pub fn desc(self, field: impl Into<String>) -> Self {
        self.key(field, IndexOrder::Desc)
    }

    /// Add a full-text key.
    pub fn text(self, field: impl Into<String>) -> Self {
        self.key(field, IndexOrder::Text)
    }

    /// Add a key with the given order.
    pub fn key(mut self, field: impl Into<String>, order: IndexOrder) -> Self {
        self.keys.push(IndexKey {
            field: field.into(),
            order,
        });
        self
    }

    /// Set an explicit name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Enforce uniqueness.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Restrict the index to matching rows/documents.
    pub fn partial(mut self, predicate: Predicate) -> Self {
        self.partial = Some(predicate);
        self
    }

    /// Request a non-blocking build.
    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    /// Use a specific access method.
    pub fn using(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Make creation idempotent.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Name the document store would assign: `email_1_createdAt_-1`.
    pub fn document_default_name(&self) -> String {
        self.keys
            .iter()
            .map(|k| format!("{}_{}", k.field, k.order.name_suffix()))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Conventional relational name: `idx_users_email_created_at`.
    pub fn relational_default_name(&self, table: &str) -> String {
        let mut name = format!("idx_{table}");
        for key in &self.keys {
            name.push('_');
            name.push_str(&key.field.replace(['.', ' '], "_"));
        }
        name
    }

    /// Comparable description of the keys, used in conflict reports.
    pub fn key_signature(&self) -> String {
        signature(self.keys.iter().map(|k| (k.field.as_str(), k.order)))
    }
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self::new()
    }
}

/// Render `field:order` pairs the way [`IndexSpec::key_signature`] does.
pub fn signature<'a>(keys: impl Iterator<Item = (&'a str, IndexOrder)>) -> String {
    keys.map(|(field, order)| {
        let order = match order {
            IndexOrder::Asc => "asc",
            IndexOrder::Desc => "desc",
            IndexOrder::Text => "text",
        };
        format!("{field}:{order}")
    })
    .collect::<Vec<_>>()
    .join(",")
}

/// Opaque store-specific statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawStatement {
    /// SQL text for relational stores.
    Sql(String),
    /// Database command document for document stores.
    Command(serde_json::Value),
}

impl RawStatement {
    /// A SQL statement.
    pub fn sql(text: impl Into<String>) -> Self {
        RawStatement::Sql(text.into())
    }
}
