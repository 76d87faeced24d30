//! Configuration storage backends that satisfy the domain [`ConfigProvider`]
//! contract: a whole-document backend (local file or expiring blob), a
//! hierarchical key/value tree, and a SeaORM relational store (SQLite by
//! default, PostgreSQL via feature flag).

mod blob;
mod builder;
mod document;
mod entity;
mod errors;
mod migration;
mod relational;
mod select;
pub mod tree;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use sea_orm::{Database, DatabaseConnection};
use usb_domain::model::Settings;
use usb_domain::storage::StorageResult;

pub use blob::{BlobDocument, BlobStore, FsBlobStore, MemoryBlobStore};
pub use builder::StorageBuilder;
pub use document::{DocumentFormat, DocumentProvider, DocumentStore, FileDocument};
pub use errors::StorageError;
pub use select::{read_settings_file, select_provider};
pub use tree::{FsTree, MemoryTree, TreeProvider};
pub use usb_domain::storage::ConfigProvider;

/// Relational configuration store.
///
/// The schema has no settings table, so the non-instance part of the
/// configuration is supplied at construction time and returned verbatim by
/// `load_configuration`.
#[derive(Clone)]
pub struct SeaOrmProvider {
    db: Arc<DatabaseConnection>,
    settings: Arc<Settings>,
}

impl SeaOrmProvider {
    /// Connects to the provided database URL. The schema is created by
    /// `initialize_configuration`.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let db = Database::connect(database_url)
            .await
            .map_err(errors::from_db_err)?;
        Ok(Self::from_connection(db))
    }

    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub(crate) fn from_connection(db: DatabaseConnection) -> Self {
        Self {
            db: Arc::new(db),
            settings: Arc::new(Settings::default()),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn settings(&self) -> &Settings {
        self.settings.as_ref()
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}
