//! Whole-document backend: the entire [`Config`] lives in one serialized
//! document. Lookups run in memory after a full load and every mutation is a
//! load, modify, replace cycle. Concurrent writers race; the last replace wins.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use usb_domain::model::{
    Config, Dial, DialEntry, Instance, InstanceEntry, PlanEntry, Service,
};
use usb_domain::storage::{observe, rules, ConfigProvider, StorageError, StorageResult};

use crate::errors::from_io_err;

/// Serialization used for a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// `.yml`/`.yaml` paths are YAML, everything else is JSON.
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml") => {
                Self::Yaml
            }
            _ => Self::Json,
        }
    }

    pub fn encode(self, config: &Config) -> StorageResult<Vec<u8>> {
        match self {
            Self::Json => serde_json::to_vec_pretty(config).map_err(StorageError::serialization),
            Self::Yaml => serde_yaml::to_string(config)
                .map(String::into_bytes)
                .map_err(StorageError::serialization),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> StorageResult<Config> {
        match self {
            Self::Json => serde_json::from_slice(bytes).map_err(StorageError::serialization),
            Self::Yaml => serde_yaml::from_slice(bytes).map_err(StorageError::serialization),
        }
    }
}

/// Location holding one serialized configuration document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short label used in logs and metrics.
    fn backend(&self) -> &'static str;

    /// Returns `None` when no document is stored.
    async fn read(&self) -> StorageResult<Option<Config>>;

    async fn write(&self, config: &Config) -> StorageResult<()>;
}

/// Document kept in a file on local disk.
#[derive(Debug, Clone)]
pub struct FileDocument {
    path: PathBuf,
    format: DocumentFormat,
}

impl FileDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = DocumentFormat::for_path(&path);
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DocumentStore for FileDocument {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn read(&self) -> StorageResult<Option<Config>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => self.format.decode(&bytes).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(from_io_err(err)),
        }
    }

    async fn write(&self, config: &Config) -> StorageResult<()> {
        let bytes = self.format.encode(config)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(from_io_err)?;
        }
        tokio::fs::write(&self.path, bytes).await.map_err(from_io_err)
    }
}

/// [`ConfigProvider`] over any [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct DocumentProvider<S> {
    store: S,
}

impl<S: DocumentStore> DocumentProvider<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replaces the whole stored document.
    pub async fn replace_configuration(&self, config: &Config) -> StorageResult<()> {
        observe(self.store.backend(), "replace_configuration", async {
            debug!(
                backend = self.store.backend(),
                instances = config.instances.len(),
                "replacing configuration document"
            );
            self.store.write(config).await
        })
        .await
    }

    async fn load(&self) -> StorageResult<Config> {
        Ok(self.store.read().await?.unwrap_or_default())
    }

    async fn modify<F>(&self, apply: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Config) -> StorageResult<()> + Send,
    {
        let mut config = self.load().await?;
        apply(&mut config)?;
        self.store.write(&config).await
    }
}

fn instance_mut<'a>(config: &'a mut Config, instance_id: &str) -> StorageResult<&'a mut Instance> {
    config
        .instances
        .get_mut(instance_id)
        .ok_or_else(|| StorageError::not_found("instance", instance_id))
}

#[async_trait]
impl<S: DocumentStore> ConfigProvider for DocumentProvider<S> {
    async fn load_configuration(&self) -> StorageResult<Config> {
        observe(self.store.backend(), "load_configuration", self.load()).await
    }

    async fn get_instance(&self, instance_id: &str) -> StorageResult<InstanceEntry> {
        observe(self.store.backend(), "get_instance", async {
            self.load()
                .await?
                .instance_entry(instance_id)
                .ok_or_else(|| StorageError::not_found("instance", instance_id))
        })
        .await
    }

    async fn set_instance(&self, instance_id: &str, instance: Instance) -> StorageResult<()> {
        observe(self.store.backend(), "set_instance", async {
            debug!(instance_id, name = %instance.name, "writing instance into document");
            rules::check_instance(instance_id, &instance)?;
            self.modify(|config| {
                rules::check_ownership(config, instance_id, &instance)?;
                config.instances.insert(instance_id.to_string(), instance);
                Ok(())
            })
            .await
        })
        .await
    }

    async fn delete_instance(&self, instance_id: &str) -> StorageResult<()> {
        observe(self.store.backend(), "delete_instance", async {
            self.modify(|config| {
                config
                    .instances
                    .remove(instance_id)
                    .map(|_| ())
                    .ok_or_else(|| StorageError::not_found("instance", instance_id))
            })
            .await
        })
        .await
    }

    async fn get_service(&self, instance_id: &str) -> StorageResult<Service> {
        observe(self.store.backend(), "get_service", async {
            let config = self.load().await?;
            config
                .instances
                .get(instance_id)
                .map(|instance| instance.service.clone())
                .filter(|service| !service.is_empty())
                .ok_or_else(|| StorageError::not_found("service", instance_id))
        })
        .await
    }

    async fn set_service(&self, instance_id: &str, service: Service) -> StorageResult<()> {
        observe(self.store.backend(), "set_service", async {
            rules::check_service(instance_id, &service)?;
            self.modify(|config| {
                instance_mut(config, instance_id)?;
                rules::check_service_owner(config, instance_id, &service)?;
                instance_mut(config, instance_id)?.service = service;
                Ok(())
            })
            .await
        })
        .await
    }

    async fn delete_service(&self, instance_id: &str) -> StorageResult<()> {
        observe(self.store.backend(), "delete_service", async {
            self.modify(|config| {
                let instance = instance_mut(config, instance_id)?;
                if instance.service.is_empty() {
                    return Err(StorageError::not_found("service", instance_id));
                }
                instance.service = Service::default();
                Ok(())
            })
            .await
        })
        .await
    }

    async fn get_dial(&self, dial_id: &str) -> StorageResult<DialEntry> {
        observe(self.store.backend(), "get_dial", async {
            self.load()
                .await?
                .find_dial(dial_id)
                .ok_or_else(|| StorageError::not_found("dial", dial_id))
        })
        .await
    }

    async fn set_dial(&self, instance_id: &str, dial_id: &str, dial: Dial) -> StorageResult<()> {
        observe(self.store.backend(), "set_dial", async {
            rules::check_dial(dial_id, &dial)?;
            self.modify(|config| {
                instance_mut(config, instance_id)?;
                rules::check_dial_owner(config, instance_id, dial_id)?;
                instance_mut(config, instance_id)?
                    .dials
                    .insert(dial_id.to_string(), dial);
                Ok(())
            })
            .await
        })
        .await
    }

    async fn delete_dial(&self, dial_id: &str) -> StorageResult<()> {
        observe(self.store.backend(), "delete_dial", async {
            self.modify(|config| {
                let owner = config
                    .find_dial(dial_id)
                    .ok_or_else(|| StorageError::not_found("dial", dial_id))?;
                instance_mut(config, &owner.instance_id)?.dials.remove(dial_id);
                Ok(())
            })
            .await
        })
        .await
    }

    async fn instance_name_exists(&self, name: &str) -> StorageResult<bool> {
        observe(self.store.backend(), "instance_name_exists", async {
            Ok(self.load().await?.instance_name_exists(name))
        })
        .await
    }

    async fn get_plan(&self, plan_id: &str) -> StorageResult<PlanEntry> {
        observe(self.store.backend(), "get_plan", async {
            self.load()
                .await?
                .find_plan(plan_id)
                .ok_or_else(|| StorageError::not_found("plan", plan_id))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_YAML: &str = r#"
api_version: "1.1"
broker_api:
  listen: ":54054"
  credentials:
    username: broker
    password: secret
management_api:
  listen: ":54053"
  broker_name: usb
  uaa:
    scope: usb.management.admin
    public_key: KEY
instances:
  A2:
    name: mysql
    target_url: "http://127.0.0.1:8080"
    dials:
      D1:
        configuration:
          server: localhost
        plan:
          id: P1
          name: small
          free: true
    service:
      id: S1
      name: mysql
      tags: [sql]
"#;

    fn write_fixture(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(DocumentFormat::for_path(Path::new("c.yml")), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::for_path(Path::new("c.YAML")), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::for_path(Path::new("c.json")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::for_path(Path::new("config")), DocumentFormat::Json);
    }

    #[tokio::test]
    async fn yaml_document_loads_nested_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "config.yml", SCENARIO_YAML);
        let provider = DocumentProvider::new(FileDocument::new(path));

        let config = provider.load_configuration().await.unwrap();
        assert!(config.instances["A2"].dials["D1"].plan.free);
        assert_eq!(config.broker_api.credentials.username, "broker");

        let uaa = provider.get_uaa_auth_config().await.unwrap();
        assert_eq!(uaa.scope, "usb.management.admin");

        let plan = provider.get_plan("P1").await.unwrap();
        assert_eq!((plan.instance_id.as_str(), plan.dial_id.as_str()), ("A2", "D1"));
    }

    #[tokio::test]
    async fn missing_file_loads_empty_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DocumentProvider::new(FileDocument::new(dir.path().join("absent.json")));

        assert_eq!(provider.load_configuration().await.unwrap(), Config::default());
        let err = provider.get_instance("A2").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn malformed_document_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "config.json", "{ not json");
        let provider = DocumentProvider::new(FileDocument::new(path));

        let err = provider.load_configuration().await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[tokio::test]
    async fn mutations_replace_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, "config.yaml", SCENARIO_YAML);
        let provider = DocumentProvider::new(FileDocument::new(path.clone()));

        provider.delete_dial("D1").await.unwrap();

        let reread = DocumentFormat::Yaml
            .decode(&std::fs::read(&path).unwrap())
            .unwrap();
        assert!(reread.instances["A2"].dials.is_empty());
        assert_eq!(reread.api_version, "1.1");
        assert!(provider.get_plan("P1").await.unwrap_err().is_not_found());
    }
}
