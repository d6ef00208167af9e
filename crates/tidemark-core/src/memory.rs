//! In-memory store implementing the adapter, ledger and lock contracts.
//!
//! Used by tests and dry experiments. It behaves like either store family,
//! keeps a log of every adapter call, and can inject ledger failures and
//! interrupted backfills.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::adapter::{
    Atomicity, CollectionSpec, DropOptions, FieldDefault, FieldSpec, IndexSpec, RawStatement,
    StoreAdapter, StoreKind,
};
use crate::config::is_reserved;
use crate::error::{AdapterError, AdapterResult, ObjectKind};
use crate::ledger::{LedgerBackend, LedgerEntry};
use crate::lock::{LockBackend, LockRecord};
use crate::types::{ExecutionId, StoreId};

type Document = Map<String, Value>;

#[derive(Debug, Clone, Default)]
struct MemoryCollection {
    columns: BTreeMap<String, FieldSpec>,
    indexes: BTreeMap<String, IndexSpec>,
    documents: Vec<Document>,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: BTreeMap<String, MemoryCollection>,
    unit_snapshot: Option<BTreeMap<String, MemoryCollection>>,
    executed: Vec<RawStatement>,
    calls: Vec<String>,
    ledger: Vec<LedgerEntry>,
    locks: BTreeMap<StoreId, LockRecord>,
    failing_ledger_appends: u32,
    backfill_budget: Option<usize>,
}

/// Structural snapshot of one collection, for comparing schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    /// Column or tracked field name to declared type.
    pub columns: BTreeMap<String, Option<String>>,
    /// Index name to key signature and uniqueness.
    pub indexes: BTreeMap<String, (String, bool)>,
}

/// Structural snapshot of the whole store.
pub type SchemaSnapshot = BTreeMap<String, CollectionSchema>;

/// In-memory store.
#[derive(Debug)]
pub struct MemoryStore {
    kind: StoreKind,
    atomicity: Atomicity,
    state: Mutex<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A transactional relational store.
    pub fn new() -> Self {
        Self::relational()
    }

    /// A transactional relational store.
    pub fn relational() -> Self {
        Self {
            kind: StoreKind::Relational,
            atomicity: Atomicity::Transactional,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// A best-effort document store.
    pub fn document() -> Self {
        Self {
            kind: StoreKind::Document,
            atomicity: Atomicity::BestEffort,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Override the reported atomicity.
    pub fn with_atomicity(mut self, atomicity: Atomicity) -> Self {
        self.atomicity = atomicity;
        self
    }

    /// Current schema.
    pub fn schema(&self) -> SchemaSnapshot {
        let state = self.state.lock();
        state
            .collections
            .iter()
            .map(|(name, c)| {
                let columns = c
                    .columns
                    .iter()
                    .map(|(n, f)| (n.clone(), f.data_type.clone()))
                    .collect();
                let indexes = c
                    .indexes
                    .iter()
                    .map(|(n, i)| (n.clone(), (i.key_signature(), i.unique)))
                    .collect();
                (name.clone(), CollectionSchema { columns, indexes })
            })
            .collect()
    }

    /// Whether a collection exists.
    pub fn has_collection(&self, name: &str) -> bool {
        self.state.lock().collections.contains_key(name)
    }

    /// Whether `collection` has an index called `index`.
    pub fn has_index(&self, collection: &str, index: &str) -> bool {
        self.state
            .lock()
            .collections
            .get(collection)
            .is_some_and(|c| c.indexes.contains_key(index))
    }

    /// Log of adapter calls, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of adapter calls so far.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Raw statements passed to `execute`.
    pub fn executed(&self) -> Vec<RawStatement> {
        self.state.lock().executed.clone()
    }

    /// Insert documents (or rows) into an existing collection.
    pub fn insert_documents(&self, collection: &str, docs: Vec<Value>) -> AdapterResult<()> {
        let mut state = self.state.lock();
        let c = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| not_found(ObjectKind::Collection, collection))?;
        for doc in docs {
            match doc {
                Value::Object(map) => c.documents.push(map),
                other => {
                    return Err(AdapterError::InvalidDefinition(format!(
                        "documents must be objects, got {other}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Documents (or rows) of a collection.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.state
            .lock()
            .collections
            .get(collection)
            .map(|c| c.documents.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Make the next `count` ledger appends fail.
    pub fn fail_ledger_appends(&self, count: u32) {
        self.state.lock().failing_ledger_appends = count;
    }

    /// Make the next document backfill stop with an error after `docs` documents.
    pub fn interrupt_backfill_after(&self, docs: usize) {
        self.state.lock().backfill_budget = Some(docs);
    }

    /// Every ledger entry across all stores.
    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().ledger.clone()
    }

    /// Insert a ledger entry directly, as another execution would.
    pub fn put_ledger_entry(&self, entry: LedgerEntry) {
        self.state.lock().ledger.push(entry);
    }

    /// Overwrite the lock record for its store.
    pub fn put_lock(&self, record: LockRecord) {
        self.state.lock().locks.insert(record.store.clone(), record);
    }

    fn record_call(&self, call: String) -> parking_lot::MutexGuard<'_, MemoryState> {
        let mut state = self.state.lock();
        state.calls.push(call);
        state
    }
}

fn not_found(kind: ObjectKind, name: &str) -> AdapterError {
    AdapterError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn already_exists(kind: ObjectKind, name: &str) -> AdapterError {
    AdapterError::AlreadyExists {
        kind,
        name: name.to_string(),
    }
}

fn check_name(name: &str) -> AdapterResult<()> {
    if name.is_empty() {
        return Err(AdapterError::InvalidDefinition("empty name".to_string()));
    }
    if is_reserved(name) {
        return Err(AdapterError::InvalidDefinition(format!(
            "{name} is reserved for migration bookkeeping"
        )));
    }
    Ok(())
}

fn default_value(field: &FieldSpec) -> Value {
    match &field.default {
        Some(FieldDefault::Value(v)) => v.clone(),
        Some(FieldDefault::Expression(e)) => Value::String(e.clone()),
        None => Value::Null,
    }
}

fn collection_mut<'a>(
    state: &'a mut MemoryState,
    name: &str,
) -> AdapterResult<&'a mut MemoryCollection> {
    state
        .collections
        .get_mut(name)
        .ok_or_else(|| not_found(ObjectKind::Collection, name))
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    fn atomicity(&self) -> Atomicity {
        self.atomicity
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> AdapterResult<()> {
        let mut state = self.record_call(format!("create_collection {}", spec.name));
        check_name(&spec.name)?;
        if state.collections.contains_key(&spec.name) {
            if spec.if_not_exists {
                return Ok(());
            }
            return Err(already_exists(ObjectKind::Collection, &spec.name));
        }
        if self.kind == StoreKind::Relational {
            if let Some(col) = spec.columns.iter().find(|c| c.data_type.is_none()) {
                return Err(AdapterError::InvalidDefinition(format!(
                    "column {} has no type",
                    col.name
                )));
            }
        }
        let columns = spec
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect();
        state.collections.insert(
            spec.name.clone(),
            MemoryCollection {
                columns,
                ..MemoryCollection::default()
            },
        );
        Ok(())
    }

    async fn drop_collection(&self, name: &str, options: &DropOptions) -> AdapterResult<()> {
        let mut state = self.record_call(format!("drop_collection {name}"));
        check_name(name)?;
        if state.collections.remove(name).is_none() && !options.if_exists {
            return Err(not_found(ObjectKind::Collection, name));
        }
        Ok(())
    }

    async fn create_index(&self, target: &str, spec: &IndexSpec) -> AdapterResult<String> {
        let mut state = self.record_call(format!("create_index {target}"));
        check_name(target)?;
        if spec.keys.is_empty() {
            return Err(AdapterError::InvalidDefinition(
                "index needs at least one key".to_string(),
            ));
        }
        let kind = self.kind;
        let c = collection_mut(&mut state, target)?;
        if kind == StoreKind::Relational {
            if let Some(key) = spec.keys.iter().find(|k| !c.columns.contains_key(&k.field)) {
                return Err(not_found(ObjectKind::Field, &key.field));
            }
        }

        let name = match (&spec.name, kind) {
            (Some(name), _) => name.clone(),
            (None, StoreKind::Document) => spec.document_default_name(),
            (None, StoreKind::Relational) => spec.relational_default_name(target),
        };
        if let Some(existing) = c.indexes.get(&name) {
            if existing.key_signature() != spec.key_signature() {
                return Err(AdapterError::IndexConflict {
                    name,
                    existing: existing.key_signature(),
                    requested: spec.key_signature(),
                });
            }
            if spec.if_not_exists {
                return Ok(name);
            }
            return Err(already_exists(ObjectKind::Index, &name));
        }
        c.indexes.insert(name.clone(), spec.clone());
        Ok(name)
    }

    async fn drop_index(&self, target: &str, name: &str, options: &DropOptions) -> AdapterResult<()> {
        let mut state = self.record_call(format!("drop_index {target}.{name}"));
        check_name(target)?;
        let removed = state
            .collections
            .get_mut(target)
            .and_then(|c| c.indexes.remove(name));
        if removed.is_none() && !options.if_exists {
            return Err(not_found(ObjectKind::Index, name));
        }
        Ok(())
    }

    async fn add_field(&self, target: &str, field: &FieldSpec) -> AdapterResult<u64> {
        let mut state = self.record_call(format!("add_field {target}.{}", field.name));
        check_name(target)?;
        let kind = self.kind;

        match kind {
            StoreKind::Relational => {
                if field.data_type.is_none() {
                    return Err(AdapterError::InvalidDefinition(format!(
                        "column {} has no type",
                        field.name
                    )));
                }
                let c = collection_mut(&mut state, target)?;
                if c.columns.contains_key(&field.name) {
                    if field.if_not_exists {
                        return Ok(0);
                    }
                    return Err(already_exists(ObjectKind::Field, &field.name));
                }
                let value = default_value(field);
                for row in &mut c.documents {
                    row.insert(field.name.clone(), value.clone());
                }
                c.columns.insert(field.name.clone(), field.clone());
                Ok(c.documents.len() as u64)
            }
            StoreKind::Document => {
                let value = match &field.default {
                    Some(FieldDefault::Expression(_)) => {
                        return Err(AdapterError::Unsupported {
                            operation: "add_field with an expression default",
                            store: StoreKind::Document,
                        })
                    }
                    _ => default_value(field),
                };
                let mut budget = state.backfill_budget.take();
                let Some(c) = state.collections.get_mut(target) else {
                    return Ok(0);
                };
                c.columns.insert(field.name.clone(), field.clone());
                let mut updated = 0u64;
                for doc in c.documents.iter_mut().filter(|d| !d.contains_key(&field.name)) {
                    if let Some(remaining) = budget.as_mut() {
                        if *remaining == 0 {
                            return Err(AdapterError::Backend(format!(
                                "backfill of {target}.{} interrupted after {updated} documents",
                                field.name
                            )));
                        }
                        *remaining -= 1;
                    }
                    doc.insert(field.name.clone(), value.clone());
                    updated += 1;
                }
                Ok(updated)
            }
        }
    }

    async fn remove_field(
        &self,
        target: &str,
        name: &str,
        options: &DropOptions,
    ) -> AdapterResult<u64> {
        let mut state = self.record_call(format!("remove_field {target}.{name}"));
        check_name(target)?;
        let kind = self.kind;
        let Some(c) = state.collections.get_mut(target) else {
            if kind == StoreKind::Document || options.if_exists {
                return Ok(0);
            }
            return Err(not_found(ObjectKind::Collection, target));
        };

        let known = c.columns.remove(name).is_some();
        if kind == StoreKind::Relational && !known && !options.if_exists {
            return Err(not_found(ObjectKind::Field, name));
        }
        let mut affected = 0u64;
        for doc in &mut c.documents {
            if doc.remove(name).is_some() {
                affected += 1;
            }
        }
        c.indexes
            .retain(|_, idx| !idx.keys.iter().any(|k| k.field == name));
        Ok(affected)
    }

    async fn rename_field(&self, target: &str, from: &str, to: &str) -> AdapterResult<u64> {
        let mut state = self.record_call(format!("rename_field {target}.{from}->{to}"));
        check_name(target)?;
        let kind = self.kind;
        let Some(c) = state.collections.get_mut(target) else {
            if kind == StoreKind::Document {
                return Ok(0);
            }
            return Err(not_found(ObjectKind::Collection, target));
        };

        if kind == StoreKind::Relational {
            if !c.columns.contains_key(from) {
                return Err(not_found(ObjectKind::Field, from));
            }
            if c.columns.contains_key(to) {
                return Err(already_exists(ObjectKind::Field, to));
            }
        }
        if let Some(mut spec) = c.columns.remove(from) {
            spec.name = to.to_string();
            c.columns.insert(to.to_string(), spec);
        }
        let mut affected = 0u64;
        for doc in &mut c.documents {
            if let Some(value) = doc.remove(from) {
                doc.insert(to.to_string(), value);
                affected += 1;
            }
        }
        for idx in c.indexes.values_mut() {
            for key in idx.keys.iter_mut().filter(|k| k.field == from) {
                key.field = to.to_string();
            }
        }
        Ok(affected)
    }

    async fn execute(&self, statement: &RawStatement) -> AdapterResult<u64> {
        let mut state = self.record_call("execute".to_string());
        match (statement, self.kind) {
            (RawStatement::Sql(_), StoreKind::Relational)
            | (RawStatement::Command(_), StoreKind::Document) => {
                state.executed.push(statement.clone());
                Ok(0)
            }
            (RawStatement::Sql(_), kind) => Err(AdapterError::Unsupported {
                operation: "SQL statement",
                store: kind,
            }),
            (RawStatement::Command(_), kind) => Err(AdapterError::Unsupported {
                operation: "database command",
                store: kind,
            }),
        }
    }

    async fn begin_unit(&self) -> AdapterResult<()> {
        let mut state = self.record_call("begin_unit".to_string());
        if state.unit_snapshot.is_some() {
            return Err(AdapterError::Transaction(
                "a unit of work is already open".to_string(),
            ));
        }
        state.unit_snapshot = Some(state.collections.clone());
        Ok(())
    }

    async fn commit_unit(&self) -> AdapterResult<()> {
        let mut state = self.record_call("commit_unit".to_string());
        state
            .unit_snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| AdapterError::Transaction("no unit of work is open".to_string()))
    }

    async fn rollback_unit(&self) -> AdapterResult<()> {
        let mut state = self.record_call("rollback_unit".to_string());
        let snapshot = state
            .unit_snapshot
            .take()
            .ok_or_else(|| AdapterError::Transaction("no unit of work is open".to_string()))?;
        state.collections = snapshot;
        Ok(())
    }
}

#[async_trait]
impl LedgerBackend for MemoryStore {
    async fn ensure_ledger(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn load_entries(&self, store: &StoreId) -> AdapterResult<Vec<LedgerEntry>> {
        let state = self.state.lock();
        let mut entries: Vec<LedgerEntry> = state
            .ledger
            .iter()
            .filter(|e| e.store == *store)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    async fn append_entry(&self, entry: &LedgerEntry) -> AdapterResult<()> {
        let mut state = self.state.lock();
        if state.failing_ledger_appends > 0 {
            state.failing_ledger_appends -= 1;
            return Err(AdapterError::Backend(
                "injected ledger write failure".to_string(),
            ));
        }
        let existing = state
            .ledger
            .iter()
            .find(|e| e.store == entry.store && e.seq == entry.seq);
        match existing {
            Some(existing) => entry.confirm_existing(existing),
            None => {
                state.ledger.push(entry.clone());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl LockBackend for MemoryStore {
    async fn ensure_locks(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn get_lock(&self, store: &StoreId) -> AdapterResult<Option<LockRecord>> {
        Ok(self.state.lock().locks.get(store).cloned())
    }

    async fn try_insert_lock(&self, record: &LockRecord) -> AdapterResult<bool> {
        let mut state = self.state.lock();
        if state.locks.contains_key(&record.store) {
            return Ok(false);
        }
        state.locks.insert(record.store.clone(), record.clone());
        Ok(true)
    }

    async fn compare_and_replace_lock(
        &self,
        expected: &LockRecord,
        replacement: &LockRecord,
    ) -> AdapterResult<bool> {
        let mut state = self.state.lock();
        match state.locks.get(&expected.store) {
            Some(current)
                if current.holder == expected.holder && current.expires_at == expected.expires_at =>
            {
                state
                    .locks
                    .insert(replacement.store.clone(), replacement.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend_lock(
        &self,
        store: &StoreId,
        holder: &ExecutionId,
        expires_at: DateTime<Utc>,
    ) -> AdapterResult<bool> {
        let mut state = self.state.lock();
        match state.locks.get_mut(store) {
            Some(record) if record.holder == *holder => {
                record.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_lock(&self, store: &StoreId, holder: &ExecutionId) -> AdapterResult<bool> {
        let mut state = self.state.lock();
        let held = state
            .locks
            .get(store)
            .is_some_and(|record| record.holder == *holder);
        if held {
            state.locks.remove(store);
        }
        Ok(held)
    }
}
