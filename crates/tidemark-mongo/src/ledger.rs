//! Ledger collection for the MongoDB adapter.
//!
//! Entry ids are `<store>:<seq>`, so a retried append hits the `_id` index.
//! The stored document then decides whether it was the same write.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::IndexModel;
use tidemark_core::{
    AdapterError, AdapterResult, Direction, ExecutionId, LedgerBackend, LedgerEntry, StoreId,
    Version,
};

use crate::adapter::MongoAdapter;
use crate::error::{backend, server_code, DUPLICATE_KEY};

pub(crate) fn to_bson_datetime(at: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(at.timestamp_millis())
}

pub(crate) fn from_bson_datetime(at: &BsonDateTime) -> AdapterResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(at.timestamp_millis())
        .single()
        .ok_or_else(|| AdapterError::Backend(format!("timestamp out of range: {at}")))
}

pub(crate) fn to_i64(value: u64, what: &str) -> AdapterResult<i64> {
    i64::try_from(value)
        .map_err(|_| AdapterError::InvalidDefinition(format!("{what} {value} exceeds int64")))
}

fn entry_id(store: &StoreId, seq: u64) -> String {
    format!("{store}:{seq}")
}

fn field_error(field: &str, err: impl std::fmt::Display) -> AdapterError {
    AdapterError::Backend(format!("ledger document field {field}: {err}"))
}

fn encode_entry(entry: &LedgerEntry) -> AdapterResult<Document> {
    Ok(doc! {
        "_id": entry_id(&entry.store, entry.seq),
        "store": entry.store.as_str(),
        "seq": to_i64(entry.seq, "seq")?,
        "version": to_i64(entry.version.get(), "version")?,
        "name": entry.name.as_str(),
        "applied_at": to_bson_datetime(entry.applied_at),
        "execution_id": entry.execution_id.as_str(),
        "direction": entry.direction.as_str(),
        "checksum": entry.checksum.as_deref().map_or(Bson::Null, |c| Bson::String(c.to_string())),
        "execution_time_ms": i64::try_from(entry.execution_time_ms).unwrap_or(i64::MAX),
    })
}

fn decode_entry(doc: &Document) -> AdapterResult<LedgerEntry> {
    let store = doc.get_str("store").map_err(|e| field_error("store", e))?;
    let seq = doc.get_i64("seq").map_err(|e| field_error("seq", e))?;
    let version = doc.get_i64("version").map_err(|e| field_error("version", e))?;
    let direction = doc
        .get_str("direction")
        .map_err(|e| field_error("direction", e))?;
    let applied_at = doc
        .get_datetime("applied_at")
        .map_err(|e| field_error("applied_at", e))?;
    let checksum = match doc.get("checksum") {
        Some(Bson::String(c)) => Some(c.clone()),
        _ => None,
    };

    Ok(LedgerEntry {
        store: StoreId::new(store).map_err(|e| field_error("store", e))?,
        seq: u64::try_from(seq).map_err(|e| field_error("seq", e))?,
        version: Version::new(u64::try_from(version).map_err(|e| field_error("version", e))?),
        name: doc
            .get_str("name")
            .map_err(|e| field_error("name", e))?
            .to_string(),
        applied_at: from_bson_datetime(applied_at)?,
        execution_id: ExecutionId::from_string(
            doc.get_str("execution_id")
                .map_err(|e| field_error("execution_id", e))?,
        ),
        direction: direction
            .parse::<Direction>()
            .map_err(|e| field_error("direction", e))?,
        checksum,
        execution_time_ms: u64::try_from(
            doc.get_i64("execution_time_ms")
                .map_err(|e| field_error("execution_time_ms", e))?,
        )
        .map_err(|e| field_error("execution_time_ms", e))?,
    })
}

#[async_trait]
impl LedgerBackend for MongoAdapter {
    async fn ensure_ledger(&self) -> AdapterResult<()> {
        let model = IndexModel::builder()
            .keys(doc! { "store": 1, "seq": 1 })
            .options(
                IndexOptions::builder()
                    .name("store_1_seq_1".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.db
            .collection::<Document>(&self.layout.ledger_name)
            .create_index(model, None)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn load_entries(&self, store: &StoreId) -> AdapterResult<Vec<LedgerEntry>> {
        let options = FindOptions::builder().sort(doc! { "seq": 1 }).build();
        let docs: Vec<Document> = self
            .db
            .collection::<Document>(&self.layout.ledger_name)
            .find(doc! { "store": store.as_str() }, options)
            .await
            .map_err(backend)?
            .try_collect()
            .await
            .map_err(backend)?;
        docs.iter().map(decode_entry).collect()
    }

    async fn append_entry(&self, entry: &LedgerEntry) -> AdapterResult<()> {
        let ledger = self.db.collection::<Document>(&self.layout.ledger_name);
        match ledger.insert_one(encode_entry(entry)?, None).await {
            Ok(_) => Ok(()),
            Err(e) if server_code(&e) == Some(DUPLICATE_KEY) => {
                let seq = to_i64(entry.seq, "seq")?;
                let filter = doc! { "store": entry.store.as_str(), "seq": seq };
                let existing = ledger
                    .find_one(filter, None)
                    .await
                    .map_err(backend)?
                    .ok_or_else(|| backend(e))?;
                entry.confirm_existing(&decode_entry(&existing)?)
            }
            Err(e) => Err(backend(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> LedgerEntry {
        LedgerEntry {
            store: StoreId::new("user-service/mongodb").unwrap(),
            seq: 4,
            version: Version::new(1704000000000),
            name: "add-user-indexes".to_string(),
            applied_at: Utc.timestamp_millis_opt(1_704_000_000_123).unwrap(),
            execution_id: ExecutionId::from_string("exec-test"),
            direction: Direction::Up,
            checksum: Some("9f2c".to_string()),
            execution_time_ms: 37,
        }
    }

    #[test]
    fn test_entry_document_shape() {
        let doc = encode_entry(&entry()).unwrap();
        assert_eq!(doc.get_str("_id").unwrap(), "user-service/mongodb:4");
        assert_eq!(doc.get_i64("version").unwrap(), 1704000000000);
        assert_eq!(doc.get_str("direction").unwrap(), "up");
        assert_eq!(decode_entry(&doc).unwrap(), entry());
    }

    #[test]
    fn test_missing_checksum_decodes_as_none() {
        let mut e = entry();
        e.checksum = None;
        let doc = encode_entry(&e).unwrap();
        assert_eq!(doc.get("checksum"), Some(&Bson::Null));
        assert_eq!(decode_entry(&doc).unwrap().checksum, None);
    }

    #[test]
    fn test_decode_rejects_bad_execution_time() {
        let mut doc = encode_entry(&entry()).unwrap();
        doc.insert("execution_time_ms", -5i64);
        assert!(matches!(decode_entry(&doc), Err(AdapterError::Backend(_))));
        doc.remove("execution_time_ms");
        assert!(matches!(decode_entry(&doc), Err(AdapterError::Backend(_))));
    }

    #[test]
    fn test_decode_rejects_bad_direction() {
        let mut doc = encode_entry(&entry()).unwrap();
        doc.insert("direction", "sideways");
        assert!(matches!(decode_entry(&doc), Err(AdapterError::Backend(_))));
    }
}
