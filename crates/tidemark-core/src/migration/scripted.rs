//! Migrations described as data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Migration;
use crate::adapter::{
    CollectionSpec, DropOptions, FieldSpec, IndexSpec, RawStatement, StoreAdapter,
};
use crate::error::{AdapterError, AdapterResult};
use crate::types::{MigrationId, Version};

/// A single adapter call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a table or collection.
    CreateCollection {
        /// Definition.
        spec: CollectionSpec,
    },
    /// Drop a table or collection.
    DropCollection {
        /// Name.
        name: String,
        /// Flags.
        #[serde(default)]
        options: DropOptions,
    },
    /// Create an index.
    CreateIndex {
        /// Table or collection.
        target: String,
        /// Definition.
        spec: IndexSpec,
    },
    /// Drop an index.
    DropIndex {
        /// Table or collection.
        target: String,
        /// Index name.
        name: String,
        /// Flags.
        #[serde(default)]
        options: DropOptions,
    },
    /// Add a column or backfill a field.
    AddField {
        /// Table or collection.
        target: String,
        /// Definition.
        field: FieldSpec,
    },
    /// Drop a column or unset a field.
    RemoveField {
        /// Table or collection.
        target: String,
        /// Field name.
        name: String,
        /// Flags.
        #[serde(default)]
        options: DropOptions,
    },
    /// Rename a column or field.
    RenameField {
        /// Table or collection.
        target: String,
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Store-specific statement.
    Execute {
        /// Statement.
        statement: RawStatement,
    },
}

impl Operation {
    /// Run this operation against `adapter`.
    pub async fn apply(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()> {
        match self {
            Operation::CreateCollection { spec } => adapter.create_collection(spec).await,
            Operation::DropCollection { name, options } => {
                adapter.drop_collection(name, options).await
            }
            Operation::CreateIndex { target, spec } => {
                adapter.create_index(target, spec).await.map(|_| ())
            }
            Operation::DropIndex {
                target,
                name,
                options,
            } => adapter.drop_index(target, name, options).await,
            Operation::AddField { target, field } => {
                adapter.add_field(target, field).await.map(|_| ())
            }
            Operation::RemoveField {
                target,
                name,
                options,
            } => adapter.remove_field(target, name, options).await.map(|_| ()),
            Operation::RenameField { target, from, to } => {
                adapter.rename_field(target, from, to).await.map(|_| ())
            }
            Operation::Execute { statement } => adapter.execute(statement).await.map(|_| ()),
        }
    }

    /// The operation that undoes this one, when it can be derived.
    ///
    /// Drops, field removals and raw statements lose information and have no
    /// derived inverse. Unnamed indexes are inverted using the document-store
    /// default name, so name indexes explicitly on relational stores.
    pub fn inverse(&self) -> Option<Operation> {
        match self {
            Operation::CreateCollection { spec } => Some(Operation::DropCollection {
                name: spec.name.clone(),
                options: DropOptions::if_exists(),
            }),
            Operation::CreateIndex { target, spec } => Some(Operation::DropIndex {
                target: target.clone(),
                name: spec
                    .name
                    .clone()
                    .unwrap_or_else(|| spec.document_default_name()),
                options: DropOptions::if_exists(),
            }),
            Operation::AddField { target, field } => Some(Operation::RemoveField {
                target: target.clone(),
                name: field.name.clone(),
                options: DropOptions::if_exists(),
            }),
            Operation::RenameField { target, from, to } => Some(Operation::RenameField {
                target: target.clone(),
                from: to.clone(),
                to: from.clone(),
            }),
            Operation::DropCollection { .. }
            | Operation::DropIndex { .. }
            | Operation::RemoveField { .. }
            | Operation::Execute { .. } => None,
        }
    }
}

/// A migration whose `up` and `down` are lists of [`Operation`]s.
///
/// Its fingerprint is the serialized operation lists, so editing an applied
/// scripted migration is caught by checksum validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedMigration {
    version: Version,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    up: Vec<Operation>,
    #[serde(default)]
    down: Vec<Operation>,
}

impl ScriptedMigration {
    /// An empty migration.
    pub fn new(version: impl Into<Version>, name: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
            description: None,
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    /// An empty migration named after a `<timestamp>_<name>` identifier.
    pub fn from_id(id: &str) -> Result<Self, crate::error::MigrationError> {
        let MigrationId { version, name } = MigrationId::parse(id)?;
        Ok(Self::new(version, name))
    }

    /// Set the description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a forward operation.
    pub fn with_up(mut self, op: Operation) -> Self {
        self.up.push(op);
        self
    }

    /// Append a reverse operation.
    pub fn with_down(mut self, op: Operation) -> Self {
        self.down.push(op);
        self
    }

    /// Replace the reverse list with the inverses of the forward list, last first.
    ///
    /// Fails with `InvalidDefinition` if any forward operation has no inverse.
    pub fn reversible(mut self) -> AdapterResult<Self> {
        let mut down = Vec::with_capacity(self.up.len());
        for op in self.up.iter().rev() {
            let inverse = op.inverse().ok_or_else(|| {
                AdapterError::InvalidDefinition(format!(
                    "migration {} has an operation without an inverse: {op:?}",
                    self.name
                ))
            })?;
            down.push(inverse);
        }
        self.down = down;
        Ok(self)
    }

    /// Forward operations.
    pub fn up_operations(&self) -> &[Operation] {
        &self.up
    }

    /// Reverse operations.
    pub fn down_operations(&self) -> &[Operation] {
        &self.down
    }
}

async fn apply_all(ops: &[Operation], adapter: &dyn StoreAdapter) -> AdapterResult<()> {
    for op in ops {
        op.apply(adapter).await?;
    }
    Ok(())
}

#[async_trait]
impl Migration for ScriptedMigration {
    fn version(&self) -> Version {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn fingerprint(&self) -> String {
        let ops = serde_json::to_string(&(&self.up, &self.down)).unwrap_or_default();
        format!("{}_{}:{ops}", self.version, self.name)
    }

    async fn up(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()> {
        apply_all(&self.up, adapter).await
    }

    async fn down(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()> {
        apply_all(&self.down, adapter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_table() -> Operation {
        Operation::CreateCollection {
            spec: CollectionSpec::new("users")
                .column(FieldSpec::typed("id", "BIGINT").not_null())
                .primary_key(["id"]),
        }
    }

    #[test]
    fn test_reversible_inverts_in_reverse_order() {
        let m = ScriptedMigration::new(1u64, "users")
            .with_up(users_table())
            .with_up(Operation::CreateIndex {
                target: "users".to_string(),
                spec: IndexSpec::new().asc("email").unique(),
            })
            .reversible()
            .unwrap();

        let down = m.down_operations();
        assert_eq!(down.len(), 2);
        assert!(matches!(
            &down[0],
            Operation::DropIndex { name, .. } if name == "email_1"
        ));
        assert!(matches!(
            &down[1],
            Operation::DropCollection { name, .. } if name == "users"
        ));
    }

    #[test]
    fn test_reversible_rejects_lossy_operations() {
        let result = ScriptedMigration::new(2u64, "drop legacy")
            .with_up(Operation::DropCollection {
                name: "legacy".to_string(),
                options: DropOptions::strict(),
            })
            .reversible();
        assert!(matches!(result, Err(AdapterError::InvalidDefinition(_))));
    }

    #[test]
    fn test_rename_inverse_swaps_names() {
        let op = Operation::RenameField {
            target: "users".to_string(),
            from: "mail".to_string(),
            to: "email".to_string(),
        };
        assert_eq!(
            op.inverse(),
            Some(Operation::RenameField {
                target: "users".to_string(),
                from: "email".to_string(),
                to: "mail".to_string(),
            })
        );
    }

    #[test]
    fn test_fingerprint_tracks_operations() {
        let a = ScriptedMigration::new(1u64, "users").with_up(users_table());
        let b = ScriptedMigration::new(1u64, "users");
        assert_ne!(a.checksum(), b.checksum());
        assert_eq!(a.checksum(), a.clone().checksum());
    }

    #[test]
    fn test_operations_deserialize_from_json() {
        let json = r#"{"op": "rename_field", "target": "users", "from": "a", "to": "b"}"#;
        let op: Operation = serde_json::from_str(json).unwrap();
        assert!(matches!(op, Operation::RenameField { .. }));
    }

    #[test]
    fn test_from_id() {
        let m = ScriptedMigration::from_id("1704000000002_add-aquarium-analytics-fields").unwrap();
        assert_eq!(m.version().get(), 1704000000002);
        assert_eq!(m.name(), "add-aquarium-analytics-fields");
    }
}
