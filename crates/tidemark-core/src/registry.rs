//! The ordered, immutable set of migrations for one store.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::MigrationError;
use crate::migration::Migration;
use crate::types::{StoreId, Version};

/// All migrations registered for a store, sorted by version.
///
/// Validated once at construction and fixed afterwards.
#[derive(Clone)]
pub struct MigrationRegistry {
    store: StoreId,
    migrations: Vec<Arc<dyn Migration>>,
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("store", &self.store)
            .field("versions", &self.all_versions_ascending())
            .finish()
    }
}

impl MigrationRegistry {
    /// Start collecting migrations for `store`.
    pub fn builder(store: StoreId) -> RegistryBuilder {
        RegistryBuilder {
            store,
            migrations: Vec::new(),
        }
    }

    /// Build a registry from a list of migrations in any order.
    pub fn new(
        store: StoreId,
        mut migrations: Vec<Arc<dyn Migration>>,
    ) -> Result<Self, MigrationError> {
        let mut names: HashMap<String, Version> = HashMap::with_capacity(migrations.len());
        for m in &migrations {
            if m.version().is_zero() {
                return Err(MigrationError::InvalidVersion {
                    name: m.name().to_string(),
                });
            }
            if let Some(first) = names.insert(m.name().to_string(), m.version()) {
                return Err(MigrationError::DuplicateName {
                    name: m.name().to_string(),
                    first,
                    second: m.version(),
                });
            }
        }

        migrations.sort_by_key(|m| m.version());
        for pair in migrations.windows(2) {
            if pair[0].version() == pair[1].version() {
                return Err(MigrationError::DuplicateVersion {
                    version: pair[0].version(),
                    first: pair[0].name().to_string(),
                    second: pair[1].name().to_string(),
                });
            }
        }

        tracing::debug!(
            store = %store,
            count = migrations.len(),
            "Migration registry built"
        );

        Ok(Self { store, migrations })
    }

    /// Store this registry belongs to.
    pub fn store(&self) -> &StoreId {
        &self.store
    }

    /// Number of registered migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether no migrations are registered.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Migrations in ascending version order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Migration>> {
        self.migrations.iter()
    }

    /// Every registered version, strictly ascending.
    pub fn all_versions_ascending(&self) -> Vec<Version> {
        self.migrations.iter().map(|m| m.version()).collect()
    }

    /// Highest registered version.
    pub fn latest_version(&self) -> Option<Version> {
        self.migrations.last().map(|m| m.version())
    }

    /// Whether `version` is registered.
    pub fn contains(&self, version: Version) -> bool {
        self.position(version).is_some()
    }

    /// Migration registered at exactly `version`.
    pub fn migration_at(&self, version: Version) -> Option<&Arc<dyn Migration>> {
        self.position(version).map(|i| &self.migrations[i])
    }

    /// First migration after `version`, or the first overall for `None`.
    pub fn migration_after(&self, version: Option<Version>) -> Option<&Arc<dyn Migration>> {
        match version {
            None => self.migrations.first(),
            Some(v) => {
                let idx = self.migrations.partition_point(|m| m.version() <= v);
                self.migrations.get(idx)
            }
        }
    }

    /// Registered version immediately before `version`.
    pub fn version_before(&self, version: Version) -> Option<Version> {
        let idx = self.migrations.partition_point(|m| m.version() < version);
        idx.checked_sub(1).map(|i| self.migrations[i].version())
    }

    /// Migrations above `current` up to and including `target`, ascending.
    ///
    /// `target = None` means the latest version.
    pub fn pending_after(
        &self,
        current: Option<Version>,
        target: Option<Version>,
    ) -> Vec<Arc<dyn Migration>> {
        self.migrations
            .iter()
            .filter(|m| current.map_or(true, |c| m.version() > c))
            .filter(|m| target.map_or(true, |t| m.version() <= t))
            .cloned()
            .collect()
    }

    /// Migrations above `target` up to and including `current`, descending.
    pub fn revertible(&self, current: Option<Version>, target: Version) -> Vec<Arc<dyn Migration>> {
        let Some(current) = current else {
            return Vec::new();
        };
        self.migrations
            .iter()
            .rev()
            .filter(|m| m.version() > target && m.version() <= current)
            .cloned()
            .collect()
    }

    fn position(&self, version: Version) -> Option<usize> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version())
            .ok()
    }
}

/// Collects migrations before validation.
pub struct RegistryBuilder {
    store: StoreId,
    migrations: Vec<Arc<dyn Migration>>,
}

impl RegistryBuilder {
    /// Add a migration.
    pub fn register<M: Migration + 'static>(mut self, migration: M) -> Self {
        self.migrations.push(Arc::new(migration));
        self
    }

    /// Add a shared migration.
    pub fn register_arc(mut self, migration: Arc<dyn Migration>) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Validate and freeze the set.
    pub fn build(self) -> Result<MigrationRegistry, MigrationError> {
        MigrationRegistry::new(self.store, self.migrations)
    }
}
