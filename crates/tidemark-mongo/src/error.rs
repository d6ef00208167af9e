//! MongoDB error types and server code classification.

use mongodb::error::{ErrorKind, WriteFailure};
use thiserror::Error;
use tidemark_core::{AdapterError, ObjectKind};

/// Errors raised while setting up the adapter.
#[derive(Debug, Error)]
pub enum MongoError {
    /// Driver or connection failure.
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<MongoError> for AdapterError {
    fn from(err: MongoError) -> Self {
        AdapterError::Backend(err.to_string())
    }
}

/// Server code for a duplicate `_id` or unique key.
pub const DUPLICATE_KEY: i32 = 11000;
/// Server code for a missing collection.
pub const NAMESPACE_NOT_FOUND: i32 = 26;
/// Server code for a missing index.
pub const INDEX_NOT_FOUND: i32 = 27;
/// Server code for an existing collection.
pub const NAMESPACE_EXISTS: i32 = 48;
/// Server code for an index name reused with other options.
pub const INDEX_OPTIONS_CONFLICT: i32 = 85;
/// Server code for an index name reused with other keys.
pub const INDEX_KEY_SPECS_CONFLICT: i32 = 86;

/// The server error code carried by `err`, if any.
pub fn server_code(err: &mongodb::error::Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(e) => Some(e.code),
        ErrorKind::Write(WriteFailure::WriteError(e)) => Some(e.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(e)) => Some(e.code),
        _ => None,
    }
}

/// Map a driver error to the adapter error an operation should report.
pub(crate) fn classify(err: mongodb::error::Error, kind: ObjectKind, name: &str) -> AdapterError {
    match server_code(&err) {
        Some(NAMESPACE_EXISTS) => AdapterError::AlreadyExists {
            kind: ObjectKind::Collection,
            name: name.to_string(),
        },
        Some(NAMESPACE_NOT_FOUND) => AdapterError::NotFound {
            kind: ObjectKind::Collection,
            name: name.to_string(),
        },
        Some(INDEX_NOT_FOUND) => AdapterError::NotFound {
            kind: ObjectKind::Index,
            name: name.to_string(),
        },
        Some(INDEX_OPTIONS_CONFLICT) | Some(INDEX_KEY_SPECS_CONFLICT) => AdapterError::IndexConflict {
            name: name.to_string(),
            existing: "unknown".to_string(),
            requested: "unknown".to_string(),
        },
        Some(DUPLICATE_KEY) => AdapterError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        _ => backend(err),
    }
}

/// Wrap a driver error that has no finer classification.
pub(crate) fn backend(err: mongodb::error::Error) -> AdapterError {
    AdapterError::Backend(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_side_error_has_no_code() {
        let err = mongodb::error::Error::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "offline",
        ));
        assert_eq!(server_code(&err), None);
        assert!(matches!(
            classify(err, ObjectKind::Index, "email_1"),
            AdapterError::Backend(_)
        ));
    }

    #[test]
    fn test_config_error_converts() {
        let err: AdapterError = MongoError::InvalidConfig("no database".to_string()).into();
        assert!(err.to_string().contains("no database"));
    }
}
