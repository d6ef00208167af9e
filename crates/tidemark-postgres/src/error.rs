//! PostgreSQL error types and SQLSTATE classification.

use thiserror::Error;
use tidemark_core::{AdapterError, AdapterResult, ObjectKind};

/// Errors raised while setting up the adapter.
#[derive(Debug, Error)]
pub enum PgError {
    /// Driver or connection failure.
    #[error("postgres error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<PgError> for AdapterError {
    fn from(err: PgError) -> Self {
        AdapterError::Backend(err.to_string())
    }
}

const UNIQUE_VIOLATION: &str = "23505";
const DUPLICATE_TABLE: &str = "42P07";
const DUPLICATE_COLUMN: &str = "42701";
const UNDEFINED_TABLE: &str = "42P01";
const UNDEFINED_OBJECT: &str = "42704";
const UNDEFINED_COLUMN: &str = "42703";

/// Map a driver error to the adapter error an operation should report.
///
/// `target` is the table the statement ran against, `kind` and `name`
/// identify the object it created or dropped.
pub(crate) fn classify(err: sqlx::Error, target: &str, kind: ObjectKind, name: &str) -> AdapterError {
    let code = sqlstate(&err);
    match code.as_deref() {
        Some(DUPLICATE_TABLE) => AdapterError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        Some(DUPLICATE_COLUMN) => AdapterError::AlreadyExists {
            kind: ObjectKind::Field,
            name: name.to_string(),
        },
        Some(UNDEFINED_TABLE) => AdapterError::NotFound {
            kind: ObjectKind::Collection,
            name: target.to_string(),
        },
        Some(UNDEFINED_OBJECT) => AdapterError::NotFound {
            kind,
            name: name.to_string(),
        },
        Some(UNDEFINED_COLUMN) => AdapterError::NotFound {
            kind: ObjectKind::Field,
            name: name.to_string(),
        },
        _ => backend(err),
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Concurrent `CREATE TABLE IF NOT EXISTS` can still collide in the catalog,
/// reporting a unique violation on `pg_type` or a duplicate table.
fn is_bootstrap_race(code: Option<&str>) -> bool {
    matches!(code, Some(UNIQUE_VIOLATION) | Some(DUPLICATE_TABLE))
}

/// Result of a bookkeeping table bootstrap; losing a creation race to another
/// runner leaves the table in place and counts as success.
pub(crate) fn bootstrap<T>(result: Result<T, sqlx::Error>) -> AdapterResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if is_bootstrap_race(sqlstate(&err).as_deref()) => {
            tracing::debug!(error = %err, "bookkeeping table created concurrently");
            Ok(())
        }
        Err(err) => Err(backend(err)),
    }
}

/// Wrap a driver error that has no finer classification.
pub(crate) fn backend(err: sqlx::Error) -> AdapterError {
    AdapterError::Backend(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_error_is_backend() {
        let err = classify(sqlx::Error::RowNotFound, "users", ObjectKind::Index, "idx");
        assert!(matches!(err, AdapterError::Backend(_)));
    }

    #[test]
    fn test_bootstrap_tolerates_creation_race() {
        assert!(is_bootstrap_race(Some("23505")));
        assert!(is_bootstrap_race(Some("42P07")));
        assert!(!is_bootstrap_race(Some("42P01")));
        assert!(!is_bootstrap_race(None));
        assert!(bootstrap::<()>(Ok(())).is_ok());
        assert!(matches!(
            bootstrap::<()>(Err(sqlx::Error::PoolTimedOut)),
            Err(AdapterError::Backend(_))
        ));
    }

    #[test]
    fn test_pg_error_converts_to_backend() {
        let err: AdapterError = PgError::InvalidConfig("bad".to_string()).into();
        match err {
            AdapterError::Backend(msg) => assert!(msg.contains("bad")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
