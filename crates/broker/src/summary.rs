use serde::Serialize;
use usb_domain::model::Config;

/// Secret-free view of a loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSummary {
    pub api_version: String,
    pub broker_name: String,
    pub instances: Vec<InstanceSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSummary {
    pub id: String,
    pub name: String,
    pub target_url: String,
    pub service: Option<String>,
    pub plans: Vec<String>,
}

impl ConfigSummary {
    pub fn from_config(config: &Config) -> Self {
        let instances = config
            .instances
            .iter()
            .map(|(id, instance)| InstanceSummary {
                id: id.clone(),
                name: instance.name.clone(),
                target_url: instance.target_url.clone(),
                service: (!instance.service.is_empty()).then(|| instance.service.name.clone()),
                plans: instance.dials.values().map(|dial| dial.plan.id.clone()).collect(),
            })
            .collect();

        Self {
            api_version: config.api_version.clone(),
            broker_name: config.management_api.broker_name.clone(),
            instances,
        }
    }

    pub fn dial_count(&self) -> usize {
        self.instances.iter().map(|instance| instance.plans.len()).sum()
    }
}
