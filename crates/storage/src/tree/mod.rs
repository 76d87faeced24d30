//! Tree backend: every scalar of the configuration graph is its own key and
//! the graph is rebuilt by prefix listing.
//!
//! Writes go key by key with no multi-key transaction, so a failing
//! `set_instance` can leave an instance partially written. Concurrent writers
//! interleave per key. Plans are found through a `plans/{plan_id}` index; when
//! the index is missing or stale the provider falls back to a full scan.

pub mod keys;
pub mod store;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};
use usb_domain::model::{
    names_collide, Config, Dial, DialEntry, Instance, InstanceEntry, ManagementApi, PlanEntry,
    Service, Settings, UaaAuth,
};
use usb_domain::storage::{observe, rules, ConfigProvider, StorageError, StorageResult};

use keys::{child_ids, validate_id, TreeLayout};
use store::{KvTree, SEPARATOR};

pub use store::{FsTree, MemoryTree};

/// Points at the first dial, in instance ID then dial ID order, carrying a
/// plan. Field order gives the derived `Ord` that same ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct PlanIndex {
    instance_id: String,
    dial_id: String,
}

impl PlanIndex {
    fn new(instance_id: &str, dial_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            dial_id: dial_id.to_string(),
        }
    }
}

/// Dials about to be removed, which must not inherit a plan index entry.
#[derive(Debug, Clone, Copy)]
enum Leaving<'a> {
    Dial(&'a str, &'a str),
    Instance(&'a str),
}

impl Leaving<'_> {
    fn covers(&self, instance_id: &str, dial_id: &str) -> bool {
        match *self {
            Leaving::Dial(owner, id) => owner == instance_id && id == dial_id,
            Leaving::Instance(owner) => owner == instance_id,
        }
    }
}

impl From<&PlanEntry> for PlanIndex {
    fn from(entry: &PlanEntry) -> Self {
        Self::new(&entry.instance_id, &entry.dial_id)
    }
}

/// [`ConfigProvider`] over any [`KvTree`].
#[derive(Debug)]
pub struct TreeProvider<T> {
    tree: T,
    layout: TreeLayout,
}

impl<T: KvTree> TreeProvider<T> {
    pub fn new(tree: T, root: impl Into<String>) -> Self {
        Self {
            tree,
            layout: TreeLayout::new(root),
        }
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub fn layout(&self) -> &TreeLayout {
        &self.layout
    }

    /// Writes the non-instance part of the configuration.
    pub async fn store_settings(&self, settings: &Settings) -> StorageResult<()> {
        observe(self.tree.backend(), "store_settings", async {
            self.tree
                .put(&self.layout.api_version(), settings.api_version.clone().into_bytes())
                .await?;
            self.put_json(&self.layout.broker_api(), &settings.broker_api).await?;
            self.put_json(&self.layout.management_api(), &settings.management_api)
                .await?;
            match &settings.routes_register {
                Some(routes) => self.put_json(&self.layout.routes_register(), routes).await,
                None => self
                    .tree
                    .delete(&self.layout.routes_register())
                    .await
                    .map(|_| ()),
            }
        })
        .await
    }

    async fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        match self.tree.get(key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(StorageError::serialization),
            None => Ok(None),
        }
    }

    async fn get_json<V: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<V>> {
        match self.tree.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(StorageError::serialization),
            None => Ok(None),
        }
    }

    async fn put_json<V: Serialize + Sync>(&self, key: &str, value: &V) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value).map_err(StorageError::serialization)?;
        self.tree.put(key, bytes).await
    }

    async fn read_settings(&self) -> StorageResult<Settings> {
        Ok(Settings {
            api_version: self
                .get_string(&self.layout.api_version())
                .await?
                .unwrap_or_default(),
            broker_api: self
                .get_json(&self.layout.broker_api())
                .await?
                .unwrap_or_default(),
            management_api: self
                .get_json(&self.layout.management_api())
                .await?
                .unwrap_or_default(),
            routes_register: self.get_json(&self.layout.routes_register()).await?,
        })
    }

    async fn instance_ids(&self) -> StorageResult<Vec<String>> {
        let prefix = self.layout.instances();
        let listed = self.tree.keys(&prefix, Some(SEPARATOR)).await?;
        Ok(child_ids(&prefix, &listed))
    }

    async fn dial_ids(&self, instance_id: &str) -> StorageResult<Vec<String>> {
        let prefix = self.layout.dials(instance_id);
        let listed = self.tree.keys(&prefix, Some(SEPARATOR)).await?;
        Ok(child_ids(&prefix, &listed))
    }

    /// An instance exists as soon as any key lives under its sub-tree.
    async fn instance_exists(&self, instance_id: &str) -> StorageResult<bool> {
        let listed = self
            .tree
            .keys(&self.layout.instance(instance_id), Some(SEPARATOR))
            .await?;
        Ok(!listed.is_empty())
    }

    async fn require_instance(&self, instance_id: &str) -> StorageResult<()> {
        if self.instance_exists(instance_id).await? {
            Ok(())
        } else {
            Err(StorageError::not_found("instance", instance_id))
        }
    }

    async fn read_dials(&self, instance_id: &str) -> StorageResult<BTreeMap<String, Dial>> {
        let mut dials = BTreeMap::new();
        for dial_id in self.dial_ids(instance_id).await? {
            if let Some(dial) = self
                .get_json::<Dial>(&self.layout.dial(instance_id, &dial_id))
                .await?
            {
                dials.insert(dial_id, dial);
            }
        }
        Ok(dials)
    }

    async fn read_instance(&self, instance_id: &str) -> StorageResult<Option<Instance>> {
        if !self.instance_exists(instance_id).await? {
            return Ok(None);
        }
        let field = |name: &str| self.layout.instance_field(instance_id, name);
        let skip_ssl = match self.get_string(&field(keys::SKIP_SSL)).await? {
            Some(raw) => raw
                .trim()
                .parse::<bool>()
                .map_err(StorageError::serialization)?,
            None => false,
        };

        Ok(Some(Instance {
            name: self.get_string(&field(keys::NAME)).await?.unwrap_or_default(),
            target_url: self
                .get_string(&field(keys::TARGET_URL))
                .await?
                .unwrap_or_default(),
            authentication_key: self
                .get_string(&field(keys::AUTHENTICATION_KEY))
                .await?
                .unwrap_or_default(),
            authentication_secret: self
                .get_string(&field(keys::AUTHENTICATION_SECRET))
                .await?
                .unwrap_or_default(),
            ca_cert: self.get_string(&field(keys::CA_CERT)).await?,
            skip_ssl,
            dials: self.read_dials(instance_id).await?,
            service: self
                .get_json(&field(keys::SERVICE))
                .await?
                .unwrap_or_default(),
        }))
    }

    async fn load(&self) -> StorageResult<Config> {
        let settings = self.read_settings().await?;
        let mut instances = BTreeMap::new();
        for instance_id in self.instance_ids().await? {
            if let Some(instance) = self.read_instance(&instance_id).await? {
                instances.insert(instance_id, instance);
            }
        }
        Ok(Config::from_parts(settings, instances))
    }

    async fn name_owner_other_than(
        &self,
        instance_id: &str,
        name: &str,
    ) -> StorageResult<Option<String>> {
        for other_id in self.instance_ids().await? {
            if other_id == instance_id {
                continue;
            }
            let other_name = self
                .get_string(&self.layout.instance_field(&other_id, keys::NAME))
                .await?
                .unwrap_or_default();
            if names_collide(&other_name, name) {
                return Ok(Some(other_id));
            }
        }
        Ok(None)
    }

    async fn check_ownership(&self, instance_id: &str, instance: &Instance) -> StorageResult<()> {
        if let Some(owner) = self.name_owner_other_than(instance_id, &instance.name).await? {
            return Err(StorageError::Constraint(format!(
                "instance name `{}` already used by `{owner}`",
                instance.name
            )));
        }
        for dial_id in instance.dials.keys() {
            self.check_dial_owner(instance_id, dial_id).await?;
        }
        self.check_service_owner(instance_id, &instance.service).await
    }

    async fn check_dial_owner(&self, instance_id: &str, dial_id: &str) -> StorageResult<()> {
        for other_id in self.instance_ids().await? {
            if other_id == instance_id {
                continue;
            }
            if self.tree.get(&self.layout.dial(&other_id, dial_id)).await?.is_some() {
                return Err(rules::dial_taken(dial_id, &other_id));
            }
        }
        Ok(())
    }

    async fn check_service_owner(&self, instance_id: &str, service: &Service) -> StorageResult<()> {
        if service.is_empty() {
            return Ok(());
        }
        for other_id in self.instance_ids().await? {
            if other_id == instance_id {
                continue;
            }
            let other: Option<Service> = self
                .get_json(&self.layout.instance_field(&other_id, keys::SERVICE))
                .await?;
            if other.is_some_and(|other| other.id == service.id) {
                return Err(rules::service_taken(&service.id, &other_id));
            }
        }
        Ok(())
    }

    async fn locate_dial(&self, dial_id: &str) -> StorageResult<Option<DialEntry>> {
        for instance_id in self.instance_ids().await? {
            if let Some(dial) = self
                .get_json::<Dial>(&self.layout.dial(&instance_id, dial_id))
                .await?
            {
                return Ok(Some(DialEntry {
                    id: dial_id.to_string(),
                    instance_id,
                    dial,
                }));
            }
        }
        Ok(None)
    }

    /// Writes the dial and keeps the plan index on the first holder of its
    /// plan.
    async fn write_dial(&self, instance_id: &str, dial_id: &str, dial: &Dial) -> StorageResult<()> {
        self.put_json(&self.layout.dial(instance_id, dial_id), dial)
            .await?;
        let plan_id = dial.plan.id.as_str();
        let candidate = PlanIndex::new(instance_id, dial_id);
        let holder = match self.get_json::<PlanIndex>(&self.layout.plan(plan_id)).await? {
            None => candidate,
            Some(current) if current == candidate => return Ok(()),
            Some(current) => {
                if self.resolve_index(plan_id, &current).await?.is_some() {
                    if current < candidate {
                        return Ok(());
                    }
                    candidate
                } else {
                    // stale entry; the scan already sees the dial written above
                    match self.scan_plan(plan_id, None).await? {
                        Some(first) => PlanIndex::from(&first),
                        None => candidate,
                    }
                }
            }
        };
        self.put_json(&self.layout.plan(plan_id), &holder).await
    }

    /// Moves the index entry for `plan_id` off the leaving dials, onto the
    /// next holder in scan order or nowhere.
    async fn unindex_plan(&self, plan_id: &str, leaving: Leaving<'_>) -> StorageResult<()> {
        if plan_id.is_empty() {
            return Ok(());
        }
        let key = self.layout.plan(plan_id);
        let Some(index) = self.get_json::<PlanIndex>(&key).await? else {
            return Ok(());
        };
        if !leaving.covers(&index.instance_id, &index.dial_id) {
            return Ok(());
        }
        match self.scan_plan(plan_id, Some(leaving)).await? {
            Some(next) => self.put_json(&key, &PlanIndex::from(&next)).await,
            None => self.tree.delete(&key).await.map(|_| ()),
        }
    }

    async fn unindex_dials(&self, instance_id: &str) -> StorageResult<()> {
        for dial in self.read_dials(instance_id).await?.into_values() {
            self.unindex_plan(&dial.plan.id, Leaving::Instance(instance_id))
                .await?;
        }
        Ok(())
    }

    async fn write_service(&self, instance_id: &str, service: &Service) -> StorageResult<()> {
        let key = self.layout.instance_field(instance_id, keys::SERVICE);
        if service.is_empty() {
            self.tree.delete(&key).await.map(|_| ())
        } else {
            self.put_json(&key, service).await
        }
    }

    /// The dial an index entry names, if it still carries `plan_id`.
    async fn resolve_index(
        &self,
        plan_id: &str,
        index: &PlanIndex,
    ) -> StorageResult<Option<PlanEntry>> {
        let dial = self
            .get_json::<Dial>(&self.layout.dial(&index.instance_id, &index.dial_id))
            .await?;
        Ok(dial
            .filter(|dial| dial.plan.id == plan_id)
            .map(|dial| PlanEntry {
                plan: dial.plan,
                dial_id: index.dial_id.clone(),
                instance_id: index.instance_id.clone(),
            }))
    }

    async fn plan_from_index(&self, plan_id: &str) -> StorageResult<Option<PlanEntry>> {
        let Some(index) = self.get_json::<PlanIndex>(&self.layout.plan(plan_id)).await? else {
            return Ok(None);
        };
        let resolved = self.resolve_index(plan_id, &index).await?;
        if resolved.is_none() {
            warn!(plan_id, "stale plan index entry, falling back to scan");
        }
        Ok(resolved)
    }

    /// Linear scan in instance ID then dial ID order, passing over leaving
    /// dials.
    async fn scan_plan(
        &self,
        plan_id: &str,
        leaving: Option<Leaving<'_>>,
    ) -> StorageResult<Option<PlanEntry>> {
        let mut instance_ids = self.instance_ids().await?;
        instance_ids.sort();
        for instance_id in instance_ids {
            let dials = self.read_dials(&instance_id).await?;
            for (dial_id, dial) in dials {
                let skipped = leaving.is_some_and(|l| l.covers(&instance_id, &dial_id));
                if skipped || dial.plan.id != plan_id {
                    continue;
                }
                return Ok(Some(PlanEntry {
                    plan: dial.plan,
                    dial_id,
                    instance_id,
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<T: KvTree> ConfigProvider for TreeProvider<T> {
    async fn load_configuration(&self) -> StorageResult<Config> {
        observe(self.tree.backend(), "load_configuration", self.load()).await
    }

    async fn get_instance(&self, instance_id: &str) -> StorageResult<InstanceEntry> {
        observe(self.tree.backend(), "get_instance", async {
            validate_id("instance", instance_id)?;
            match self.read_instance(instance_id).await? {
                Some(instance) => Ok(InstanceEntry {
                    id: instance_id.to_string(),
                    instance,
                }),
                None => Err(StorageError::not_found("instance", instance_id)),
            }
        })
        .await
    }

    async fn set_instance(&self, instance_id: &str, instance: Instance) -> StorageResult<()> {
        observe(self.tree.backend(), "set_instance", async {
            validate_id("instance", instance_id)?;
            for dial_id in instance.dials.keys() {
                validate_id("dial", dial_id)?;
            }
            rules::check_instance(instance_id, &instance)?;
            self.check_ownership(instance_id, &instance).await?;
            debug!(instance_id, dials = instance.dials.len(), "writing instance keys");

            self.unindex_dials(instance_id).await?;
            self.tree.delete_tree(&self.layout.dials(instance_id)).await?;

            let field = |name: &str| self.layout.instance_field(instance_id, name);
            self.tree
                .put(&field(keys::NAME), instance.name.clone().into_bytes())
                .await?;
            self.tree
                .put(&field(keys::TARGET_URL), instance.target_url.clone().into_bytes())
                .await?;
            self.tree
                .put(
                    &field(keys::AUTHENTICATION_KEY),
                    instance.authentication_key.clone().into_bytes(),
                )
                .await?;
            self.tree
                .put(
                    &field(keys::AUTHENTICATION_SECRET),
                    instance.authentication_secret.clone().into_bytes(),
                )
                .await?;
            match &instance.ca_cert {
                Some(cert) => {
                    self.tree
                        .put(&field(keys::CA_CERT), cert.clone().into_bytes())
                        .await?
                }
                None => {
                    self.tree.delete(&field(keys::CA_CERT)).await?;
                }
            }
            self.tree
                .put(&field(keys::SKIP_SSL), instance.skip_ssl.to_string().into_bytes())
                .await?;
            self.write_service(instance_id, &instance.service).await?;

            for (dial_id, dial) in &instance.dials {
                self.write_dial(instance_id, dial_id, dial).await?;
            }
            Ok(())
        })
        .await
    }

    async fn delete_instance(&self, instance_id: &str) -> StorageResult<()> {
        observe(self.tree.backend(), "delete_instance", async {
            validate_id("instance", instance_id)?;
            self.require_instance(instance_id).await?;
            self.unindex_dials(instance_id).await?;
            let removed = self.tree.delete_tree(&self.layout.instance(instance_id)).await?;
            debug!(instance_id, removed, "deleted instance sub-tree");
            Ok(())
        })
        .await
    }

    async fn get_service(&self, instance_id: &str) -> StorageResult<Service> {
        observe(self.tree.backend(), "get_service", async {
            validate_id("instance", instance_id)?;
            self.get_json(&self.layout.instance_field(instance_id, keys::SERVICE))
                .await?
                .ok_or_else(|| StorageError::not_found("service", instance_id))
        })
        .await
    }

    async fn set_service(&self, instance_id: &str, service: Service) -> StorageResult<()> {
        observe(self.tree.backend(), "set_service", async {
            validate_id("instance", instance_id)?;
            rules::check_service(instance_id, &service)?;
            self.require_instance(instance_id).await?;
            self.check_service_owner(instance_id, &service).await?;
            self.write_service(instance_id, &service).await
        })
        .await
    }

    async fn delete_service(&self, instance_id: &str) -> StorageResult<()> {
        observe(self.tree.backend(), "delete_service", async {
            validate_id("instance", instance_id)?;
            let existed = self
                .tree
                .delete(&self.layout.instance_field(instance_id, keys::SERVICE))
                .await?;
            if existed {
                Ok(())
            } else {
                Err(StorageError::not_found("service", instance_id))
            }
        })
        .await
    }

    async fn get_dial(&self, dial_id: &str) -> StorageResult<DialEntry> {
        observe(self.tree.backend(), "get_dial", async {
            validate_id("dial", dial_id)?;
            self.locate_dial(dial_id)
                .await?
                .ok_or_else(|| StorageError::not_found("dial", dial_id))
        })
        .await
    }

    async fn set_dial(&self, instance_id: &str, dial_id: &str, dial: Dial) -> StorageResult<()> {
        observe(self.tree.backend(), "set_dial", async {
            validate_id("instance", instance_id)?;
            validate_id("dial", dial_id)?;
            rules::check_dial(dial_id, &dial)?;
            self.require_instance(instance_id).await?;
            self.check_dial_owner(instance_id, dial_id).await?;
            if let Some(previous) = self
                .get_json::<Dial>(&self.layout.dial(instance_id, dial_id))
                .await?
            {
                self.unindex_plan(&previous.plan.id, Leaving::Dial(instance_id, dial_id))
                    .await?;
            }
            self.write_dial(instance_id, dial_id, &dial).await
        })
        .await
    }

    async fn delete_dial(&self, dial_id: &str) -> StorageResult<()> {
        observe(self.tree.backend(), "delete_dial", async {
            validate_id("dial", dial_id)?;
            let entry = self
                .locate_dial(dial_id)
                .await?
                .ok_or_else(|| StorageError::not_found("dial", dial_id))?;
            self.tree
                .delete(&self.layout.dial(&entry.instance_id, dial_id))
                .await?;
            let leaving = Leaving::Dial(&entry.instance_id, dial_id);
            self.unindex_plan(&entry.dial.plan.id, leaving).await
        })
        .await
    }

    async fn instance_name_exists(&self, name: &str) -> StorageResult<bool> {
        observe(self.tree.backend(), "instance_name_exists", async {
            Ok(self.name_owner_other_than("", name).await?.is_some())
        })
        .await
    }

    async fn get_plan(&self, plan_id: &str) -> StorageResult<PlanEntry> {
        observe(self.tree.backend(), "get_plan", async {
            if let Some(entry) = self.plan_from_index(plan_id).await? {
                return Ok(entry);
            }
            let entry = self
                .scan_plan(plan_id, None)
                .await?
                .ok_or_else(|| StorageError::not_found("plan", plan_id))?;
            self.put_json(&self.layout.plan(plan_id), &PlanIndex::from(&entry))
                .await?;
            Ok(entry)
        })
        .await
    }

    async fn get_uaa_auth_config(&self) -> StorageResult<UaaAuth> {
        observe(self.tree.backend(), "get_uaa_auth_config", async {
            let management: ManagementApi = self
                .get_json(&self.layout.management_api())
                .await?
                .unwrap_or_default();
            Ok(management.uaa_auth)
        })
        .await
    }
}
