//! Connection settings for the MongoDB adapter.

use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use tidemark_core::StoreLayout;

use crate::error::MongoError;

/// Default connection string when none is configured.
pub const DEFAULT_URI: &str = "mongodb://localhost:27017";

/// Default application name reported to the server.
pub const DEFAULT_APP_NAME: &str = "tidemark";

/// MongoDB adapter configuration.
#[derive(Debug, Clone)]
pub struct MongoConfig {
    /// Connection string.
    pub uri: String,

    /// Database holding the service's collections, ledger and locks.
    pub database: String,

    /// Application name reported in server logs.
    pub app_name: String,

    /// Names of the ledger and lock collections.
    pub layout: StoreLayout,
}

impl MongoConfig {
    /// Create a configuration for `database` at `uri`.
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            app_name: DEFAULT_APP_NAME.to_string(),
            layout: StoreLayout::default(),
        }
    }

    /// Read `MONGODB_URI` and `MONGODB_DATABASE`, with defaults.
    pub fn from_env() -> Self {
        let uri = std::env::var("MONGODB_URI").unwrap_or_else(|_| DEFAULT_URI.to_string());
        let database = std::env::var("MONGODB_DATABASE").unwrap_or_else(|_| "tidemark".to_string());
        Self::new(uri, database)
    }

    /// Set the application name.
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Set the ledger and lock collection names.
    pub fn with_layout(mut self, layout: StoreLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Connect and return the configured database handle.
    pub async fn connect(&self) -> Result<Database, MongoError> {
        if self.database.is_empty() {
            return Err(MongoError::InvalidConfig(
                "database name must not be empty".to_string(),
            ));
        }
        let mut options = ClientOptions::parse(&self.uri).await?;
        options.app_name = Some(self.app_name.clone());
        let client = Client::with_options(options)?;
        Ok(client.database(&self.database))
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URI, "tidemark")
    }
}
