use sea_orm::Database;
use usb_domain::model::Settings;
use usb_domain::storage::{ConfigProvider, StorageResult};

use crate::{errors::from_db_err, errors::StorageError, SeaOrmProvider};

pub struct StorageBuilder {
    database_url: Option<String>,
    settings: Option<Settings>,
    migrate: bool,
}

impl Default for StorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self {
            database_url: None,
            settings: None,
            migrate: true,
        }
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Skips schema creation on build. Callers then run
    /// `initialize_configuration` themselves.
    pub fn skip_migrations(mut self) -> Self {
        self.migrate = false;
        self
    }

    pub async fn build(self) -> StorageResult<SeaOrmProvider> {
        let url = self
            .database_url
            .ok_or_else(|| StorageError::Unavailable("missing database url".into()))?;
        let db = Database::connect(url).await.map_err(from_db_err)?;
        let mut provider = SeaOrmProvider::from_connection(db);
        if let Some(settings) = self.settings {
            provider = provider.with_settings(settings);
        }
        if self.migrate {
            provider.initialize_configuration().await?;
        }
        Ok(provider)
    }
}
