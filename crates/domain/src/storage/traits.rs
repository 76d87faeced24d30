use std::future::Future;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;

use crate::model::{Config, Dial, DialEntry, Instance, InstanceEntry, PlanEntry, Service, UaaAuth};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("transaction failed: {0}")]
    Transaction(String),
    #[error("database error: {0}")]
    Database(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization(err.to_string())
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Unavailable(_) => "unavailable",
            Self::Serialization(_) => "serialization",
            Self::Constraint(_) => "constraint",
            Self::Transaction(_) => "transaction",
            Self::Database(_) => "database",
        }
    }
}

/// Counter incremented once per provider operation.
pub const OPERATIONS_METRIC: &str = "config_provider_operations_total";

/// Counts one provider operation, labelled by backend and outcome.
pub fn record_operation<T>(
    backend: &'static str,
    operation: &'static str,
    result: &StorageResult<T>,
) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    counter!(
        OPERATIONS_METRIC,
        "backend" => backend,
        "operation" => operation,
        "result" => outcome
    )
    .increment(1);
}

/// Awaits one provider operation and records its outcome.
pub async fn observe<T, F>(
    backend: &'static str,
    operation: &'static str,
    fut: F,
) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    let result = fut.await;
    record_operation(backend, operation, &result);
    result
}

/// Operations every configuration backend implements.
///
/// Every read goes to the backend; nothing is cached. Addressing an absent
/// instance, dial, service or plan yields [`StorageError::NotFound`].
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Prepares the backend for first use. Only the relational backend has
    /// work to do here (schema migration).
    async fn initialize_configuration(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn load_configuration(&self) -> StorageResult<Config>;

    async fn get_instance(&self, instance_id: &str) -> StorageResult<InstanceEntry>;
    /// Upserts the instance together with its dials and service. Dials not
    /// present in `instance` are removed.
    async fn set_instance(&self, instance_id: &str, instance: Instance) -> StorageResult<()>;
    /// Removes the instance, its dials and its service.
    async fn delete_instance(&self, instance_id: &str) -> StorageResult<()>;

    async fn get_service(&self, instance_id: &str) -> StorageResult<Service>;
    async fn set_service(&self, instance_id: &str, service: Service) -> StorageResult<()>;
    async fn delete_service(&self, instance_id: &str) -> StorageResult<()>;

    async fn get_dial(&self, dial_id: &str) -> StorageResult<DialEntry>;
    async fn set_dial(&self, instance_id: &str, dial_id: &str, dial: Dial) -> StorageResult<()>;
    async fn delete_dial(&self, dial_id: &str) -> StorageResult<()>;

    async fn instance_name_exists(&self, name: &str) -> StorageResult<bool>;

    async fn get_plan(&self, plan_id: &str) -> StorageResult<PlanEntry>;

    async fn get_uaa_auth_config(&self) -> StorageResult<UaaAuth> {
        Ok(self.load_configuration().await?.management_api.uaa_auth)
    }
}
