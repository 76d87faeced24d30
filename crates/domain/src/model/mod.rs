//! In-memory representation of the broker configuration graph.
//!
//! The same types are serialized whole by the document backend, field by
//! field by the tree backend and row by row by the relational backend.

mod payload;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use payload::DialConfiguration;

/// Root aggregate persisted by every provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_version: String,
    pub broker_api: BrokerApi,
    pub management_api: ManagementApi,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes_register: Option<RoutesRegister>,
    pub instances: BTreeMap<String, Instance>,
}

impl Config {
    /// Splits the non-instance part of the configuration off.
    pub fn settings(&self) -> Settings {
        Settings {
            api_version: self.api_version.clone(),
            broker_api: self.broker_api.clone(),
            management_api: self.management_api.clone(),
            routes_register: self.routes_register.clone(),
        }
    }

    pub fn from_parts(settings: Settings, instances: BTreeMap<String, Instance>) -> Self {
        Self {
            api_version: settings.api_version,
            broker_api: settings.broker_api,
            management_api: settings.management_api,
            routes_register: settings.routes_register,
            instances,
        }
    }

    pub fn instance_entry(&self, id: &str) -> Option<InstanceEntry> {
        self.instances.get(id).map(|instance| InstanceEntry {
            id: id.to_string(),
            instance: instance.clone(),
        })
    }

    /// Finds a dial by ID across all instances. Instances are visited in
    /// ascending ID order, so the first match is deterministic even if a dial
    /// ID was reused under two instances.
    pub fn find_dial(&self, dial_id: &str) -> Option<DialEntry> {
        self.instances.iter().find_map(|(instance_id, instance)| {
            instance.dials.get(dial_id).map(|dial| DialEntry {
                id: dial_id.to_string(),
                instance_id: instance_id.clone(),
                dial: dial.clone(),
            })
        })
    }

    /// Linear scan for a plan. Visits instances and then dials in ascending
    /// ID order and returns the first match.
    pub fn find_plan(&self, plan_id: &str) -> Option<PlanEntry> {
        self.instances.iter().find_map(|(instance_id, instance)| {
            instance
                .dials
                .iter()
                .find(|(_, dial)| dial.plan.id == plan_id)
                .map(|(dial_id, dial)| PlanEntry {
                    plan: dial.plan.clone(),
                    dial_id: dial_id.clone(),
                    instance_id: instance_id.clone(),
                })
        })
    }

    pub fn instance_name_exists(&self, name: &str) -> bool {
        self.instances
            .values()
            .any(|instance| names_collide(&instance.name, name))
    }

    /// Returns the ID of an instance other than `id` already using `name`.
    pub fn name_owner_other_than(&self, id: &str, name: &str) -> Option<&str> {
        self.instances
            .iter()
            .find(|(other_id, instance)| {
                other_id.as_str() != id && names_collide(&instance.name, name)
            })
            .map(|(other_id, _)| other_id.as_str())
    }

    /// Returns the ID of an instance other than `id` holding a dial keyed
    /// `dial_id`.
    pub fn dial_owner_other_than(&self, id: &str, dial_id: &str) -> Option<&str> {
        self.instances
            .iter()
            .find(|(other_id, instance)| {
                other_id.as_str() != id && instance.dials.contains_key(dial_id)
            })
            .map(|(other_id, _)| other_id.as_str())
    }

    /// Returns the ID of an instance other than `id` whose stored service
    /// carries `service_id`.
    pub fn service_owner_other_than(&self, id: &str, service_id: &str) -> Option<&str> {
        self.instances
            .iter()
            .find(|(other_id, instance)| {
                other_id.as_str() != id
                    && !instance.service.is_empty()
                    && instance.service.id == service_id
            })
            .map(|(other_id, _)| other_id.as_str())
    }
}

/// Instance names are compared case-insensitively.
pub fn names_collide(left: &str, right: &str) -> bool {
    left.to_lowercase() == right.to_lowercase()
}

/// Everything in [`Config`] except the instance graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_version: String,
    pub broker_api: BrokerApi,
    pub management_api: ManagementApi,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes_register: Option<RoutesRegister>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerApi {
    pub listen: String,
    pub external_url: String,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementApi {
    pub listen: String,
    pub dev_mode: bool,
    pub broker_name: String,
    #[serde(rename = "uaa")]
    pub uaa_auth: UaaAuth,
    pub cloud_controller: CloudController,
}

/// Token verification settings for the management API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UaaAuth {
    pub scope: String,
    pub public_key: String,
    pub client_name: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudController {
    pub api: String,
    pub skip_ssl_validation: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesRegister {
    pub nats_members: Vec<String>,
    pub broker_api_host: String,
    pub broker_api_port: u16,
    pub management_api_host: String,
    pub management_api_port: u16,
}

/// A configured deployment of one driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Instance {
    pub name: String,
    pub target_url: String,
    pub authentication_key: String,
    pub authentication_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
    pub skip_ssl: bool,
    pub dials: BTreeMap<String, Dial>,
    pub service: Service,
}

/// A configuration variant of an instance, paired with exactly one plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dial {
    pub configuration: DialConfiguration,
    pub plan: Plan,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub free: bool,
    pub metadata: PlanMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlanMetadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bullets: Vec<String>,
}

/// Marketplace catalog entry representing an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    pub bindable: bool,
    pub plan_updateable: bool,
    pub tags: Vec<String>,
    pub requires: Vec<String>,
    pub metadata: ServiceMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_client: Option<DashboardClient>,
}

impl Service {
    /// A default service stands for "no service stored".
    pub fn is_empty(&self) -> bool {
        self == &Service::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceMetadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub long_description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub provider_display_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub documentation_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub support_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardClient {
    pub id: String,
    pub secret: String,
    pub redirect_uri: String,
}

/// An instance together with the key it is stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceEntry {
    pub id: String,
    pub instance: Instance,
}

/// A dial together with the instance owning it.
#[derive(Debug, Clone, PartialEq)]
pub struct DialEntry {
    pub id: String,
    pub instance_id: String,
    pub dial: Dial,
}

/// A plan resolved to its owning dial and instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub plan: Plan,
    pub dial_id: String,
    pub instance_id: String,
}
