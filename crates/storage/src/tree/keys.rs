//! Key namespace of the tree backend.
//!
//! ```text
//! {root}/api_version
//! {root}/broker_api
//! {root}/management_api
//! {root}/routes_register
//! {root}/instances/{id}/{field}
//! {root}/instances/{id}/dials/{dial_id}
//! {root}/plans/{plan_id}
//! ```

use usb_domain::storage::{StorageError, StorageResult};

use super::store::SEPARATOR;

pub const NAME: &str = "name";
pub const TARGET_URL: &str = "target_url";
pub const AUTHENTICATION_KEY: &str = "authentication_key";
pub const AUTHENTICATION_SECRET: &str = "authentication_secret";
pub const CA_CERT: &str = "ca_cert";
pub const SKIP_SSL: &str = "skip_ssl";
pub const SERVICE: &str = "service";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeLayout {
    root: String,
}

impl TreeLayout {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            root: root.trim_matches(SEPARATOR).to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn api_version(&self) -> String {
        format!("{}/api_version", self.root)
    }

    pub fn broker_api(&self) -> String {
        format!("{}/broker_api", self.root)
    }

    pub fn management_api(&self) -> String {
        format!("{}/management_api", self.root)
    }

    pub fn routes_register(&self) -> String {
        format!("{}/routes_register", self.root)
    }

    pub fn instances(&self) -> String {
        format!("{}/instances/", self.root)
    }

    pub fn instance(&self, instance_id: &str) -> String {
        format!("{}/instances/{instance_id}/", self.root)
    }

    pub fn instance_field(&self, instance_id: &str, field: &str) -> String {
        format!("{}/instances/{instance_id}/{field}", self.root)
    }

    pub fn dials(&self, instance_id: &str) -> String {
        format!("{}/instances/{instance_id}/dials/", self.root)
    }

    pub fn dial(&self, instance_id: &str, dial_id: &str) -> String {
        format!("{}/instances/{instance_id}/dials/{dial_id}", self.root)
    }

    pub fn plan(&self, plan_id: &str) -> String {
        format!("{}/plans/{plan_id}", self.root)
    }
}

/// IDs of the direct children listed under `prefix`, in listing order.
pub fn child_ids(prefix: &str, listed: &[String]) -> Vec<String> {
    listed
        .iter()
        .filter_map(|key| key.strip_prefix(prefix))
        .map(|rest| rest.trim_end_matches(SEPARATOR))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// IDs become path segments, so they must be non-empty and separator free.
pub fn validate_id(kind: &'static str, id: &str) -> StorageResult<()> {
    if id.is_empty() || id.contains(SEPARATOR) {
        return Err(StorageError::Constraint(format!("invalid {kind} id `{id}`")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_builds_nested_keys() {
        let layout = TreeLayout::new("/usb/");
        assert_eq!(layout.instances(), "usb/instances/");
        assert_eq!(layout.instance_field("X", NAME), "usb/instances/X/name");
        assert_eq!(layout.dial("X", "D1"), "usb/instances/X/dials/D1");
        assert_eq!(layout.plan("P1"), "usb/plans/P1");
    }

    #[test]
    fn child_ids_trim_prefix_and_separator() {
        let listed = vec![
            "usb/instances/a/".to_string(),
            "usb/instances/b/".to_string(),
            "usb/other".to_string(),
        ];
        assert_eq!(child_ids("usb/instances/", &listed), vec!["a", "b"]);
    }

    #[test]
    fn ids_with_separators_are_rejected() {
        assert!(validate_id("instance", "a/b").is_err());
        assert!(validate_id("instance", "").is_err());
        assert!(validate_id("instance", "a-b").is_ok());
    }
}
