//! Service migrations.

mod analytics;
mod aquarium;
mod users;

pub use analytics::CreateMetricsHypertable;
pub use aquarium::AddAquariumAnalyticsFields;
pub use users::add_user_indexes;
