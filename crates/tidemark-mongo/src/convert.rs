//! JSON to BSON conversion for specs built with `serde_json`.

use mongodb::bson::{Bson, Document};
use serde_json::Value;
use tidemark_core::{AdapterError, AdapterResult, IndexKey, IndexOrder};

/// Convert a JSON value. Integers that fit in 32 bits become `Int32`, as
/// the shell would write them.
pub fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                match i32::try_from(i) {
                    Ok(small) => Bson::Int32(small),
                    Err(_) => Bson::Int64(i),
                }
            } else {
                Bson::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => {
            let mut doc = Document::new();
            for (k, v) in map {
                doc.insert(k.clone(), json_to_bson(v));
            }
            Bson::Document(doc)
        }
    }
}

/// Convert a JSON object into a document.
pub fn json_to_document(value: &Value) -> AdapterResult<Document> {
    match json_to_bson(value) {
        Bson::Document(doc) => Ok(doc),
        other => Err(AdapterError::InvalidDefinition(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Key document for `createIndexes`: `1`, `-1` or `"text"` per field.
pub fn index_keys(keys: &[IndexKey]) -> Document {
    let mut doc = Document::new();
    for key in keys {
        let value = match key.order {
            IndexOrder::Asc => Bson::Int32(1),
            IndexOrder::Desc => Bson::Int32(-1),
            IndexOrder::Text => Bson::String("text".to_string()),
        };
        doc.insert(key.field.clone(), value);
    }
    doc
}

/// Read back the field orders of an existing index.
///
/// Text indexes are stored as `_fts`/`_ftsx` keys plus a `weights`
/// document; their fields are recovered from the weights.
pub fn orders_of(keys: &Document, weights: Option<&Document>) -> Vec<(String, IndexOrder)> {
    let mut orders = Vec::new();
    for (field, value) in keys {
        match field.as_str() {
            "_fts" => {
                if let Some(weights) = weights {
                    orders.extend(weights.keys().map(|f| (f.clone(), IndexOrder::Text)));
                }
            }
            "_ftsx" => {}
            _ => {
                let order = match value {
                    Bson::String(s) if s == "text" => IndexOrder::Text,
                    Bson::Int32(n) if *n < 0 => IndexOrder::Desc,
                    Bson::Int64(n) if *n < 0 => IndexOrder::Desc,
                    Bson::Double(n) if *n < 0.0 => IndexOrder::Desc,
                    _ => IndexOrder::Asc,
                };
                orders.push((field.clone(), order));
            }
        }
    }
    orders
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use serde_json::json;
    use tidemark_core::{signature, IndexSpec};

    #[test]
    fn test_json_to_document() {
        let doc = json_to_document(&json!({
            "timeseries": {"timeField": "timestamp", "granularity": "hours"},
            "expireAfterSeconds": 2592000,
            "big": 5_000_000_000i64,
            "ratio": 0.5,
            "tags": ["a", null]
        }))
        .unwrap();
        assert_eq!(
            doc,
            doc! {
                "big": 5_000_000_000i64,
                "expireAfterSeconds": 2592000,
                "ratio": 0.5,
                "tags": ["a", Bson::Null],
                "timeseries": {"granularity": "hours", "timeField": "timestamp"},
            }
        );
        assert!(json_to_document(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_index_keys() {
        let spec = IndexSpec::new().asc("email").desc("createdAt").text("bio");
        assert_eq!(
            index_keys(&spec.keys),
            doc! {"email": 1, "createdAt": -1, "bio": "text"}
        );
    }

    #[test]
    fn test_orders_of_text_index() {
        let keys = doc! {"owner": 1, "_fts": "text", "_ftsx": 1};
        let weights = doc! {"name": 1};
        let orders = orders_of(&keys, Some(&weights));
        let sig = signature(orders.iter().map(|(f, o)| (f.as_str(), *o)));
        assert_eq!(sig, "owner:asc,name:text");
    }
}
