//! The migration unit.
//!
//! A migration is a pair of operations against a [`StoreAdapter`]: `up`
//! applies the change and `down` reverses it. Identity is the version; the
//! name is for humans.

mod scripted;

pub use scripted::{Operation, ScriptedMigration};

use async_trait::async_trait;

use crate::adapter::StoreAdapter;
use crate::error::AdapterResult;
use crate::types::{MigrationId, Version};

/// One schema change and its inverse.
///
/// Once applied, a migration must not change: the ledger keeps a checksum
/// of [`Migration::fingerprint`] to detect drift.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Position in the store's timeline. Must be non-zero and unique.
    fn version(&self) -> Version;

    /// Unique human-facing name.
    fn name(&self) -> &str;

    /// Optional longer description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Stable text that changes whenever the migration's behavior changes.
    ///
    /// Code-defined migrations default to their identifier. Override this to
    /// make edits detectable.
    fn fingerprint(&self) -> String {
        self.id().to_string()
    }

    /// BLAKE3 hex digest of the fingerprint, as stored in the ledger.
    fn checksum(&self) -> String {
        checksum_of(&self.fingerprint())
    }

    /// `<version>_<name>` identifier.
    fn id(&self) -> MigrationId {
        MigrationId::new(self.version(), self.name())
    }

    /// Apply the change.
    async fn up(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()>;

    /// Reverse the change.
    async fn down(&self, adapter: &dyn StoreAdapter) -> AdapterResult<()>;
}

/// Checksum used for ledger entries.
pub fn checksum_of(fingerprint: &str) -> String {
    hex::encode(blake3::hash(fingerprint.as_bytes()).as_bytes())
}
