//! Identity types shared by every component.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

/// Position of a migration in its store's timeline.
///
/// Versions are strictly positive. `Version::ZERO` stands for "nothing
/// applied" and is only valid as a rollback target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// The empty timeline.
    pub const ZERO: Version = Version(0);

    /// Create a version from its numeric value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the empty-timeline marker.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Version)
            .map_err(|_| MigrationError::InvalidMigrationId(s.to_string()))
    }
}

/// Direction a migration was run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Forward application.
    Up,
    /// Reversal.
    Down,
}

impl Direction {
    /// Lowercase name as stored in the ledger.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(MigrationError::Storage(crate::error::AdapterError::Backend(
                format!("unknown ledger direction: {other}"),
            ))),
        }
    }
}

/// Logical name of a migration timeline, e.g. `analytics-service/postgres`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(String);

impl StoreId {
    /// Validate and wrap a store identifier.
    ///
    /// Allowed characters are ASCII alphanumerics and `.`, `_`, `/`, `-`.
    pub fn new(id: impl Into<String>) -> Result<Self, MigrationError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-'));
        if valid {
            Ok(Self(id))
        } else {
            Err(MigrationError::InvalidStoreId(id))
        }
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one runner invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Generate a fresh execution identifier.
    pub fn generate() -> Self {
        Self(format!("exec-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Wrap an existing identifier, e.g. one read back from the ledger.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conventional `<timestamp>_<name>` migration identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MigrationId {
    /// Numeric prefix.
    pub version: Version,
    /// Descriptive suffix.
    pub name: String,
}

impl MigrationId {
    /// Build an identifier from its parts.
    pub fn new(version: Version, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
        }
    }

    /// Parse `1704000000001_create-metrics-hypertable`.
    ///
    /// A leading `m` (as in module names like `m1704000000001_...`) is accepted.
    pub fn parse(id: &str) -> Result<Self, MigrationError> {
        let trimmed = id.strip_prefix('m').unwrap_or(id);
        let (digits, name) = trimmed
            .split_once('_')
            .ok_or_else(|| MigrationError::InvalidMigrationId(id.to_string()))?;

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) || name.is_empty() {
            return Err(MigrationError::InvalidMigrationId(id.to_string()));
        }

        let version = digits
            .parse::<u64>()
            .map_err(|_| MigrationError::InvalidMigrationId(id.to_string()))?;
        if version == 0 {
            return Err(MigrationError::InvalidMigrationId(id.to_string()));
        }

        Ok(Self::new(Version(version), name))
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.version, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_migration_id() {
        let id = MigrationId::parse("1704000000001_create-metrics-hypertable").unwrap();
        assert_eq!(id.version, Version::new(1704000000001));
        assert_eq!(id.name, "create-metrics-hypertable");
        assert_eq!(id.to_string(), "1704000000001_create-metrics-hypertable");
    }

    #[test]
    fn test_parse_module_style_id() {
        let id = MigrationId::parse("m1704000000000_add_user_indexes").unwrap();
        assert_eq!(id.version.get(), 1704000000000);
        assert_eq!(id.name, "add_user_indexes");
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        for bad in ["", "create-users", "_users", "12a_users", "12_", "0_init"] {
            assert!(
                matches!(MigrationId::parse(bad), Err(MigrationError::InvalidMigrationId(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_store_id_validation() {
        assert!(StoreId::new("event-service/mongo").is_ok());
        assert!(StoreId::new("analytics_service.pg").is_ok());
        assert!(StoreId::new("").is_err());
        assert!(StoreId::new("bad store").is_err());
        assert!(StoreId::new("drop;table").is_err());
    }

    #[test]
    fn test_execution_ids_are_unique() {
        let a = ExecutionId::generate();
        let b = ExecutionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("exec-"));
    }

    #[test]
    fn test_direction_round_trip() {
        assert_eq!("up".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!(Direction::Down.to_string(), "down");
        assert!("sideways".parse::<Direction>().is_err());
    }
}
