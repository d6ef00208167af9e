//! Lock collection for the MongoDB adapter.
//!
//! One document per store with `_id` set to the store id. A takeover is a
//! filtered `update_one` that only matches the previous holder and expiry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Document};
use mongodb::Collection;
use tidemark_core::{AdapterError, AdapterResult, ExecutionId, LockBackend, LockRecord, StoreId};

use crate::adapter::MongoAdapter;
use crate::error::{backend, server_code, DUPLICATE_KEY};
use crate::ledger::{from_bson_datetime, to_bson_datetime};

impl MongoAdapter {
    fn locks(&self) -> Collection<Document> {
        self.db.collection::<Document>(&self.layout.lock_name)
    }
}

fn encode_lock(record: &LockRecord) -> Document {
    doc! {
        "_id": record.store.as_str(),
        "holder": record.holder.as_str(),
        "acquired_at": to_bson_datetime(record.acquired_at),
        "expires_at": to_bson_datetime(record.expires_at),
    }
}

fn decode_lock(store: &StoreId, doc: &Document) -> AdapterResult<LockRecord> {
    let field = |name: &str, e: mongodb::bson::document::ValueAccessError| {
        AdapterError::Backend(format!("lock document field {name}: {e}"))
    };
    Ok(LockRecord {
        store: store.clone(),
        holder: ExecutionId::from_string(doc.get_str("holder").map_err(|e| field("holder", e))?),
        acquired_at: from_bson_datetime(
            doc.get_datetime("acquired_at")
                .map_err(|e| field("acquired_at", e))?,
        )?,
        expires_at: from_bson_datetime(
            doc.get_datetime("expires_at")
                .map_err(|e| field("expires_at", e))?,
        )?,
    })
}

#[async_trait]
impl LockBackend for MongoAdapter {
    async fn ensure_locks(&self) -> AdapterResult<()> {
        // `_id` is the only index the lock collection needs.
        Ok(())
    }

    async fn get_lock(&self, store: &StoreId) -> AdapterResult<Option<LockRecord>> {
        let found = self
            .locks()
            .find_one(doc! { "_id": store.as_str() }, None)
            .await
            .map_err(backend)?;
        found.map(|doc| decode_lock(store, &doc)).transpose()
    }

    async fn try_insert_lock(&self, record: &LockRecord) -> AdapterResult<bool> {
        match self.locks().insert_one(encode_lock(record), None).await {
            Ok(_) => Ok(true),
            Err(e) if server_code(&e) == Some(DUPLICATE_KEY) => Ok(false),
            Err(e) => Err(backend(e)),
        }
    }

    async fn compare_and_replace_lock(
        &self,
        expected: &LockRecord,
        replacement: &LockRecord,
    ) -> AdapterResult<bool> {
        if expected.store != replacement.store {
            return Err(AdapterError::InvalidDefinition(
                "lock takeover must stay on the same store".to_string(),
            ));
        }
        let result = self
            .locks()
            .update_one(
                doc! {
                    "_id": expected.store.as_str(),
                    "holder": expected.holder.as_str(),
                    "expires_at": to_bson_datetime(expected.expires_at),
                },
                doc! { "$set": {
                    "holder": replacement.holder.as_str(),
                    "acquired_at": to_bson_datetime(replacement.acquired_at),
                    "expires_at": to_bson_datetime(replacement.expires_at),
                } },
                None,
            )
            .await
            .map_err(backend)?;
        Ok(result.matched_count == 1)
    }

    async fn extend_lock(
        &self,
        store: &StoreId,
        holder: &ExecutionId,
        expires_at: DateTime<Utc>,
    ) -> AdapterResult<bool> {
        let result = self
            .locks()
            .update_one(
                doc! { "_id": store.as_str(), "holder": holder.as_str() },
                doc! { "$set": { "expires_at": to_bson_datetime(expires_at) } },
                None,
            )
            .await
            .map_err(backend)?;
        Ok(result.matched_count == 1)
    }

    async fn remove_lock(&self, store: &StoreId, holder: &ExecutionId) -> AdapterResult<bool> {
        let result = self
            .locks()
            .delete_one(doc! { "_id": store.as_str(), "holder": holder.as_str() }, None)
            .await
            .map_err(backend)?;
        Ok(result.deleted_count == 1)
    }
}
