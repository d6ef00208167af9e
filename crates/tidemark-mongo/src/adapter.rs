//! Document store adapter over a MongoDB database.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use tidemark_core::config::is_reserved;
use tidemark_core::{
    signature, AdapterError, AdapterResult, Atomicity, CollectionSpec, DropOptions, FieldDefault,
    FieldSpec, IndexSpec, ObjectKind, Predicate, RawStatement, StoreAdapter, StoreKind,
    StoreLayout,
};
use tracing::{debug, info};

use crate::config::MongoConfig;
use crate::convert::{index_keys, json_to_bson, json_to_document, orders_of};
use crate::error::{backend, classify, server_code, MongoError, NAMESPACE_NOT_FOUND};

/// MongoDB adapter.
///
/// Multi-document schema work has no transaction here, so the adapter
/// reports [`Atomicity::BestEffort`]. Backfills only touch documents that
/// still lack the field, which makes them safe to re-run.
pub struct MongoAdapter {
    pub(crate) db: Database,
    pub(crate) layout: StoreLayout,
}

impl MongoAdapter {
    /// Wrap a database handle.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            layout: StoreLayout::default(),
        }
    }

    /// Connect using `config`.
    pub async fn connect(config: &MongoConfig) -> Result<Self, MongoError> {
        let db = config.connect().await?;
        Ok(Self::new(db).with_layout(config.layout.clone()))
    }

    /// Use custom ledger and lock collection names.
    pub fn with_layout(mut self, layout: StoreLayout) -> Self {
        self.layout = layout;
        self
    }

    /// The underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    async fn collection_exists(&self, name: &str) -> AdapterResult<bool> {
        let names = self
            .db
            .list_collection_names(doc! { "name": name })
            .await
            .map_err(backend)?;
        Ok(!names.is_empty())
    }

    /// Existing indexes of `target`, or none if the collection is missing.
    async fn indexes(&self, target: &str) -> AdapterResult<Vec<IndexModel>> {
        let cursor = match self.collection(target).list_indexes(None).await {
            Ok(cursor) => cursor,
            Err(e) if server_code(&e) == Some(NAMESPACE_NOT_FOUND) => return Ok(Vec::new()),
            Err(e) => return Err(backend(e)),
        };
        cursor.try_collect().await.map_err(backend)
    }
}

fn check_name(name: &str) -> AdapterResult<()> {
    if is_reserved(name) {
        return Err(AdapterError::InvalidDefinition(format!(
            "{name} is in the reserved _tidemark namespace"
        )));
    }
    Ok(())
}

fn index_name(model: &IndexModel) -> Option<&str> {
    model.options.as_ref().and_then(|o| o.name.as_deref())
}

fn index_signature(model: &IndexModel) -> String {
    let weights = model.options.as_ref().and_then(|o| o.weights.as_ref());
    let orders = orders_of(&model.keys, weights);
    signature(orders.iter().map(|(field, order)| (field.as_str(), *order)))
}

fn default_bson(field: &FieldSpec) -> AdapterResult<Bson> {
    match &field.default {
        Some(FieldDefault::Value(value)) => Ok(json_to_bson(value)),
        Some(FieldDefault::Expression(_)) => Err(AdapterError::Unsupported {
            operation: "add_field with expression default",
            store: StoreKind::Document,
        }),
        None => Ok(Bson::Null),
    }
}

#[async_trait]
impl StoreAdapter for MongoAdapter {
    fn kind(&self) -> StoreKind {
        StoreKind::Document
    }

    fn atomicity(&self) -> Atomicity {
        Atomicity::BestEffort
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> AdapterResult<()> {
        check_name(&spec.name)?;
        if self.collection_exists(&spec.name).await? {
            if spec.if_not_exists {
                return Ok(());
            }
            return Err(AdapterError::AlreadyExists {
                kind: ObjectKind::Collection,
                name: spec.name.clone(),
            });
        }

        let mut command = doc! { "create": spec.name.as_str() };
        if let Some(options) = &spec.options {
            for (key, value) in json_to_document(options)? {
                command.insert(key, value);
            }
        }
        self.db
            .run_command(command, None)
            .await
            .map_err(|e| classify(e, ObjectKind::Collection, &spec.name))?;
        info!(collection = %spec.name, "Created collection");
        Ok(())
    }

    async fn drop_collection(&self, name: &str, options: &DropOptions) -> AdapterResult<()> {
        check_name(name)?;
        if !self.collection_exists(name).await? {
            if options.if_exists {
                return Ok(());
            }
            return Err(AdapterError::NotFound {
                kind: ObjectKind::Collection,
                name: name.to_string(),
            });
        }
        self.collection(name)
            .drop(None)
            .await
            .map_err(|e| classify(e, ObjectKind::Collection, name))
    }

    async fn create_index(&self, target: &str, spec: &IndexSpec) -> AdapterResult<String> {
        check_name(target)?;
        if spec.keys.is_empty() {
            return Err(AdapterError::InvalidDefinition(
                "index needs at least one key".to_string(),
            ));
        }
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| spec.document_default_name());

        let existing = self.indexes(target).await?;
        if let Some(model) = existing.iter().find(|m| index_name(m) == Some(name.as_str())) {
            let existing = index_signature(model);
            let requested = spec.key_signature();
            if existing != requested {
                return Err(AdapterError::IndexConflict {
                    name,
                    existing,
                    requested,
                });
            }
            if spec.if_not_exists {
                return Ok(name);
            }
            return Err(AdapterError::AlreadyExists {
                kind: ObjectKind::Index,
                name,
            });
        }

        let partial = match &spec.partial {
            Some(Predicate::Document(filter)) => Some(json_to_document(filter)?),
            Some(Predicate::Sql(_)) => {
                return Err(AdapterError::InvalidDefinition(
                    "document partial indexes take a JSON filter".to_string(),
                ))
            }
            None => None,
        };
        let options = IndexOptions::builder()
            .name(name.clone())
            .unique(spec.unique)
            .background(spec.background)
            .partial_filter_expression(partial)
            .build();
        let model = IndexModel::builder()
            .keys(index_keys(&spec.keys))
            .options(options)
            .build();

        let created = self
            .collection(target)
            .create_index(model, None)
            .await
            .map_err(|e| classify(e, ObjectKind::Index, &name))?;
        debug!(collection = %target, index = %created.index_name, "Created index");
        Ok(created.index_name)
    }

    async fn drop_index(&self, target: &str, name: &str, options: &DropOptions) -> AdapterResult<()> {
        check_name(target)?;
        let exists = self
            .indexes(target)
            .await?
            .iter()
            .any(|m| index_name(m) == Some(name));
        if !exists {
            if options.if_exists {
                return Ok(());
            }
            return Err(AdapterError::NotFound {
                kind: ObjectKind::Index,
                name: name.to_string(),
            });
        }
        self.collection(target)
            .drop_index(name, None)
            .await
            .map_err(|e| classify(e, ObjectKind::Index, name))
    }

    async fn add_field(&self, target: &str, field: &FieldSpec) -> AdapterResult<u64> {
        check_name(target)?;
        let value = default_bson(field)?;
        let result = self
            .collection(target)
            .update_many(
                doc! { field.name.as_str(): { "$exists": false } },
                doc! { "$set": { field.name.as_str(): value } },
                None,
            )
            .await
            .map_err(backend)?;
        debug!(
            collection = %target,
            field = %field.name,
            modified = result.modified_count,
            "Backfilled field"
        );
        Ok(result.modified_count)
    }

    async fn remove_field(
        &self,
        target: &str,
        name: &str,
        _options: &DropOptions,
    ) -> AdapterResult<u64> {
        check_name(target)?;
        let result = self
            .collection(target)
            .update_many(
                doc! { name: { "$exists": true } },
                doc! { "$unset": { name: "" } },
                None,
            )
            .await
            .map_err(backend)?;
        Ok(result.modified_count)
    }

    async fn rename_field(&self, target: &str, from: &str, to: &str) -> AdapterResult<u64> {
        check_name(target)?;
        let result = self
            .collection(target)
            .update_many(
                doc! { from: { "$exists": true } },
                doc! { "$rename": { from: to } },
                None,
            )
            .await
            .map_err(backend)?;
        Ok(result.modified_count)
    }

    async fn execute(&self, statement: &RawStatement) -> AdapterResult<u64> {
        let command = match statement {
            RawStatement::Command(command) => json_to_document(command)?,
            RawStatement::Sql(_) => {
                return Err(AdapterError::Unsupported {
                    operation: "SQL statement",
                    store: StoreKind::Document,
                })
            }
        };
        let reply = self.db.run_command(command, None).await.map_err(backend)?;
        let affected = match reply.get("n") {
            Some(Bson::Int32(n)) => u64::try_from(*n).unwrap_or(0),
            Some(Bson::Int64(n)) => u64::try_from(*n).unwrap_or(0),
            _ => 0,
        };
        Ok(affected)
    }
}
