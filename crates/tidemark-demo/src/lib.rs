//! Service migrations wired into a host binary.
//!
//! Each service owns one store timeline. The binary picks the timeline from
//! `--store` and connects the matching adapter.

pub mod migrations;

use tidemark::{MigrationError, MigrationRegistry, StoreId, StoreKind};

/// Store timelines known to this binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// `analytics-service/postgres`: TimescaleDB metrics.
    Analytics,
    /// `user-service/mongodb`: user collection indexes.
    Users,
    /// `aquarium-service/mongodb`: aquarium analytics fields.
    Aquarium,
}

impl Service {
    /// Every service, in display order.
    pub const ALL: [Service; 3] = [Service::Analytics, Service::Users, Service::Aquarium];

    /// Store id of this service's timeline.
    pub fn store(self) -> &'static str {
        match self {
            Service::Analytics => "analytics-service/postgres",
            Service::Users => "user-service/mongodb",
            Service::Aquarium => "aquarium-service/mongodb",
        }
    }

    /// Look up the service for a store id.
    pub fn from_store(store: &StoreId) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.store() == store.as_str())
    }

    /// Store family the timeline lives in.
    pub fn kind(self) -> StoreKind {
        match self {
            Service::Analytics => StoreKind::Relational,
            Service::Users | Service::Aquarium => StoreKind::Document,
        }
    }

    /// Registry of this service's migrations.
    pub fn registry(self) -> Result<MigrationRegistry, MigrationError> {
        let builder = MigrationRegistry::builder(StoreId::new(self.store())?);
        match self {
            Service::Analytics => builder.register(migrations::CreateMetricsHypertable),
            Service::Users => builder.register(migrations::add_user_indexes()),
            Service::Aquarium => builder.register(migrations::AddAquariumAnalyticsFields),
        }
        .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_service_builds() {
        for service in Service::ALL {
            let registry = service.registry().unwrap();
            assert_eq!(registry.store().as_str(), service.store());
            let store = StoreId::new(service.store()).unwrap();
            assert_eq!(Service::from_store(&store), Some(service));
        }
    }

    #[test]
    fn test_unknown_store() {
        let store = StoreId::new("billing-service/postgres").unwrap();
        assert_eq!(Service::from_store(&store), None);
    }
}
