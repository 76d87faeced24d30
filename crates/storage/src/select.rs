//! Builds the single provider a process uses from its [`ProviderConfig`].

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use usb_domain::config::{BackendKind, ProviderConfig, MEMORY_BLOB_PATH, MEMORY_TREE_PATH};
use usb_domain::model::Settings;
use usb_domain::storage::{ConfigProvider, StorageError, StorageResult};

use crate::blob::{BlobDocument, BlobStore, FsBlobStore, MemoryBlobStore};
use crate::builder::StorageBuilder;
use crate::document::{DocumentFormat, DocumentProvider, DocumentStore, FileDocument};
use crate::errors::from_io_err;
use crate::tree::store::KvTree;
use crate::tree::{FsTree, MemoryTree, TreeProvider};

/// Reads the settings part of a configuration document. Instances in the
/// document are ignored.
pub async fn read_settings_file(path: &Path) -> StorageResult<Settings> {
    let bytes = tokio::fs::read(path).await.map_err(from_io_err)?;
    Ok(DocumentFormat::for_path(path).decode(&bytes)?.settings())
}

async fn optional_settings(config: &ProviderConfig) -> StorageResult<Option<Settings>> {
    match config.settings_file() {
        Some(path) => read_settings_file(path).await.map(Some),
        None => Ok(None),
    }
}

fn missing(what: &str) -> StorageError {
    StorageError::Unavailable(format!("no {what} configured"))
}

/// Constructs the configured backend. The relational schema is not touched
/// here; callers run `initialize_configuration` before first use.
pub async fn select_provider(
    config: &ProviderConfig,
) -> StorageResult<Arc<dyn ConfigProvider>> {
    info!(backend = %config.backend(), "selecting configuration provider");
    match config.backend() {
        BackendKind::File => {
            let path = config.config_file().ok_or_else(|| missing("configuration file"))?;
            Ok(Arc::new(DocumentProvider::new(FileDocument::new(path.clone()))))
        }
        BackendKind::Blob => {
            let path = config.blob_path().ok_or_else(|| missing("blob path"))?;
            if path == MEMORY_BLOB_PATH {
                blob_provider(MemoryBlobStore::new(), config).await
            } else {
                blob_provider(FsBlobStore::new(path), config).await
            }
        }
        BackendKind::Tree => {
            let path = config.tree_path().ok_or_else(|| missing("tree path"))?;
            let settings = optional_settings(config).await?;
            if path == MEMORY_TREE_PATH {
                let provider = TreeProvider::new(MemoryTree::new(), config.tree_prefix());
                seed_tree(&provider, settings).await?;
                Ok(Arc::new(provider))
            } else {
                let provider = TreeProvider::new(FsTree::new(path), config.tree_prefix());
                seed_tree(&provider, settings).await?;
                Ok(Arc::new(provider))
            }
        }
        BackendKind::Sql => {
            let url = config.database_url().ok_or_else(|| missing("database url"))?;
            let mut builder = StorageBuilder::new().database_url(url).skip_migrations();
            if let Some(settings) = optional_settings(config).await? {
                builder = builder.settings(settings);
            }
            Ok(Arc::new(builder.build().await?))
        }
    }
}

/// Seeds the blob from the configuration file, when one is configured.
async fn blob_provider<B: BlobStore + 'static>(
    store: B,
    config: &ProviderConfig,
) -> StorageResult<Arc<dyn ConfigProvider>> {
    let document = BlobDocument::new(store, config.blob_key(), config.blob_ttl());
    let provider = DocumentProvider::new(document);
    if let Some(path) = config.config_file() {
        if let Some(initial) = FileDocument::new(path.clone()).read().await? {
            provider.replace_configuration(&initial).await?;
        }
    }
    Ok(Arc::new(provider))
}

async fn seed_tree<T: KvTree>(
    provider: &TreeProvider<T>,
    settings: Option<Settings>,
) -> StorageResult<()> {
    match settings {
        Some(settings) => provider.store_settings(&settings).await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usb_domain::model::Instance;

    const SETTINGS_YAML: &str = r#"
api_version: "2.6"
broker_api:
  listen: ":54054"
  external_url: "http://broker.example"
  credentials:
    username: admin
    password: secret
management_api:
  listen: ":54053"
  dev_mode: false
  broker_name: usb
  uaa:
    scope: usb.management.admin
    public_key: key
    client_name: usb
    client_secret: usb-secret
  cloud_controller:
    api: "https://api.example"
    skip_ssl_validation: true
"#;

    #[tokio::test]
    async fn file_backend_reads_through_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, SETTINGS_YAML).unwrap();

        let config = ProviderConfig::new(BackendKind::File).with_config_file(&path);
        let provider = select_provider(&config).await.unwrap();
        let config = provider.load_configuration().await.unwrap();
        assert_eq!(config.api_version, "2.6");
        assert!(config.instances.is_empty());
    }

    #[tokio::test]
    async fn memory_tree_is_seeded_with_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.yaml");
        std::fs::write(&settings, SETTINGS_YAML).unwrap();

        let config = ProviderConfig::new(BackendKind::Tree)
            .with_tree_path(MEMORY_TREE_PATH)
            .with_settings_file(&settings);
        let provider = select_provider(&config).await.unwrap();
        let uaa = provider.get_uaa_auth_config().await.unwrap();
        assert_eq!(uaa.client_secret, "usb-secret");
    }

    #[tokio::test]
    async fn fs_tree_persists_between_providers() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        let config = ProviderConfig::new(BackendKind::Tree).with_tree_path(root.to_string_lossy());

        let first = select_provider(&config).await.unwrap();
        first
            .set_instance(
                "inst-1",
                Instance {
                    name: "Alpha".into(),
                    ..Instance::default()
                },
            )
            .await
            .unwrap();

        let second = select_provider(&config).await.unwrap();
        assert!(second.instance_name_exists("alpha").await.unwrap());
    }

    #[tokio::test]
    async fn blob_backend_is_seeded_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, SETTINGS_YAML).unwrap();

        let config = ProviderConfig::new(BackendKind::Blob)
            .with_blob_path(MEMORY_BLOB_PATH)
            .with_config_file(&path);
        let provider = select_provider(&config).await.unwrap();
        let config = provider.load_configuration().await.unwrap();
        assert_eq!(config.broker_api.credentials.username, "admin");
    }

    #[tokio::test]
    async fn blob_path_selects_a_persistent_store() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("blobs");
        let config = ProviderConfig::new(BackendKind::Blob).with_blob_path(root.to_string_lossy());

        let first = select_provider(&config).await.unwrap();
        first
            .set_instance(
                "inst-1",
                Instance {
                    name: "Alpha".into(),
                    ..Instance::default()
                },
            )
            .await
            .unwrap();
        assert!(root.join("usb").join("config").is_file());

        let second = select_provider(&config).await.unwrap();
        assert!(second.instance_name_exists("alpha").await.unwrap());

        let unset = select_provider(&ProviderConfig::new(BackendKind::Blob)).await;
        assert!(matches!(unset, Err(StorageError::Unavailable(_))));
    }

    #[tokio::test]
    async fn sql_backend_carries_injected_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.yml");
        std::fs::write(&settings, SETTINGS_YAML).unwrap();

        let config = ProviderConfig::new(BackendKind::Sql)
            .with_database_url("sqlite::memory:")
            .with_settings_file(&settings);
        let provider = select_provider(&config).await.unwrap();
        provider.initialize_configuration().await.unwrap();

        let loaded = provider.load_configuration().await.unwrap();
        assert_eq!(loaded.management_api.cloud_controller.api, "https://api.example");
        assert!(loaded.instances.is_empty());
    }

    #[tokio::test]
    async fn missing_location_is_unavailable() {
        let result = select_provider(&ProviderConfig::new(BackendKind::Sql)).await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
    }
}
