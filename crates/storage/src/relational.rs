//! Relational backend: the graph is normalized into `Instances`, `Dials`,
//! `Plans` and `Services`. Every multi-row write runs in one transaction that
//! is committed on success and rolled back on any error.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};
use usb_domain::model::{
    names_collide, Config, Dial, DialConfiguration, DialEntry, Instance, InstanceEntry, Plan,
    PlanEntry, Service,
};
use usb_domain::storage::{observe, rules, ConfigProvider, StorageError, StorageResult};

use crate::entity::{dials, instances, plans, services};
use crate::errors::from_db_err;
use crate::migration::run_migrations;
use crate::SeaOrmProvider;

const BACKEND: &str = "sql";

fn to_blob<V: Serialize>(value: &V) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(StorageError::serialization)
}

fn from_blob<V: DeserializeOwned + Default>(bytes: &[u8]) -> StorageResult<V> {
    if bytes.is_empty() {
        return Ok(V::default());
    }
    serde_json::from_slice(bytes).map_err(StorageError::serialization)
}

fn plan_from_model(model: plans::Model) -> StorageResult<Plan> {
    Ok(Plan {
        metadata: from_blob(&model.metadata)?,
        id: model.guid,
        name: model.name,
        description: model.description,
        free: model.free,
    })
}

fn service_from_model(model: services::Model) -> StorageResult<Service> {
    Ok(Service {
        tags: from_blob(&model.tags)?,
        requires: from_blob(&model.requires)?,
        metadata: from_blob(&model.metadata)?,
        dashboard_client: match model.dashboard_client.as_deref() {
            Some(bytes) if !bytes.is_empty() => Some(from_blob(bytes)?),
            _ => None,
        },
        id: model.guid,
        name: model.name,
        description: model.description,
        bindable: model.bindable,
        plan_updateable: model.plan_updateable,
    })
}

fn instance_from_model(
    model: instances::Model,
    dials: BTreeMap<String, Dial>,
    service: Service,
) -> Instance {
    Instance {
        name: model.name,
        target_url: model.target_url,
        authentication_key: model.authentication_key,
        authentication_secret: model.authentication_secret,
        ca_cert: model.ca_cert,
        skip_ssl: model.skip_ssl,
        dials,
        service,
    }
}

fn missing_plan(dial_id: &str, plan_id: &str) -> StorageError {
    StorageError::Database(format!("dial `{dial_id}` references missing plan `{plan_id}`"))
}

async fn find_plan<C: ConnectionTrait>(db: &C, dial: &dials::Model) -> StorageResult<Plan> {
    let plan = plans::Entity::find_by_id(dial.plans_guid.clone())
        .one(db)
        .await
        .map_err(from_db_err)?
        .ok_or_else(|| missing_plan(&dial.guid, &dial.plans_guid))?;
    plan_from_model(plan)
}

async fn read_instance<C: ConnectionTrait>(
    db: &C,
    instance_id: &str,
) -> StorageResult<Option<Instance>> {
    let Some(row) = instances::Entity::find_by_id(instance_id.to_string())
        .one(db)
        .await
        .map_err(from_db_err)?
    else {
        return Ok(None);
    };

    let dial_rows = dials::Entity::find()
        .filter(dials::Column::InstancesGuid.eq(instance_id))
        .all(db)
        .await
        .map_err(from_db_err)?;
    let mut dials = BTreeMap::new();
    for dial in dial_rows {
        let plan = find_plan(db, &dial).await?;
        dials.insert(
            dial.guid,
            Dial {
                configuration: DialConfiguration::new(dial.configuration),
                plan,
            },
        );
    }

    let service = services::Entity::find()
        .filter(services::Column::InstancesGuid.eq(instance_id))
        .one(db)
        .await
        .map_err(from_db_err)?
        .map(service_from_model)
        .transpose()?
        .unwrap_or_default();

    Ok(Some(instance_from_model(row, dials, service)))
}

async fn require_instance<C: ConnectionTrait>(db: &C, instance_id: &str) -> StorageResult<()> {
    let found = instances::Entity::find_by_id(instance_id.to_string())
        .one(db)
        .await
        .map_err(from_db_err)?;
    match found {
        Some(_) => Ok(()),
        None => Err(StorageError::not_found("instance", instance_id)),
    }
}

async fn ensure_unique_name<C: ConnectionTrait>(
    db: &C,
    instance_id: &str,
    name: &str,
) -> StorageResult<()> {
    let others = instances::Entity::find()
        .filter(instances::Column::Guid.ne(instance_id))
        .all(db)
        .await
        .map_err(from_db_err)?;
    match others.iter().find(|other| names_collide(&other.name, name)) {
        Some(owner) => Err(StorageError::Constraint(format!(
            "instance name `{name}` already used by `{}`",
            owner.guid
        ))),
        None => Ok(()),
    }
}

/// Dial rows keep their instance; writing one under another instance is a
/// constraint error rather than a move.
async fn ensure_dial_free<C: ConnectionTrait>(
    db: &C,
    instance_id: &str,
    dial_id: &str,
) -> StorageResult<()> {
    let found = dials::Entity::find_by_id(dial_id.to_string())
        .one(db)
        .await
        .map_err(from_db_err)?;
    match found {
        Some(row) if row.instances_guid != instance_id => {
            Err(rules::dial_taken(dial_id, &row.instances_guid))
        }
        _ => Ok(()),
    }
}

async fn ensure_service_free<C: ConnectionTrait>(
    db: &C,
    instance_id: &str,
    service: &Service,
) -> StorageResult<()> {
    if service.is_empty() {
        return Ok(());
    }
    let found = services::Entity::find_by_id(service.id.clone())
        .one(db)
        .await
        .map_err(from_db_err)?;
    match found {
        Some(row) if row.instances_guid != instance_id => {
            Err(rules::service_taken(&service.id, &row.instances_guid))
        }
        _ => Ok(()),
    }
}

async fn insert_dial<C: ConnectionTrait>(
    db: &C,
    instance_id: &str,
    dial_id: &str,
    dial: &Dial,
) -> StorageResult<()> {
    let plan = plans::ActiveModel {
        guid: Set(dial.plan.id.clone()),
        name: Set(dial.plan.name.clone()),
        description: Set(dial.plan.description.clone()),
        free: Set(dial.plan.free),
        metadata: Set(to_blob(&dial.plan.metadata)?),
    };
    plans::Entity::insert(plan)
        .exec_without_returning(db)
        .await
        .map_err(from_db_err)?;

    let row = dials::ActiveModel {
        guid: Set(dial_id.to_string()),
        configuration: Set(dial.configuration.as_bytes().to_vec()),
        plans_guid: Set(dial.plan.id.clone()),
        instances_guid: Set(instance_id.to_string()),
    };
    dials::Entity::insert(row)
        .exec_without_returning(db)
        .await
        .map_err(from_db_err)?;
    Ok(())
}

/// Deletes dial rows matching `filter` and then the plans they referenced.
async fn delete_dials_where<C, F>(db: &C, filter: F) -> StorageResult<u64>
where
    C: ConnectionTrait,
    F: sea_orm::sea_query::IntoCondition + Clone,
{
    let doomed = dials::Entity::find()
        .filter(filter.clone())
        .all(db)
        .await
        .map_err(from_db_err)?;
    if doomed.is_empty() {
        return Ok(0);
    }
    let plan_ids: Vec<String> = doomed.iter().map(|dial| dial.plans_guid.clone()).collect();

    let removed = dials::Entity::delete_many()
        .filter(filter)
        .exec(db)
        .await
        .map_err(from_db_err)?
        .rows_affected;
    plans::Entity::delete_many()
        .filter(plans::Column::Guid.is_in(plan_ids))
        .exec(db)
        .await
        .map_err(from_db_err)?;
    Ok(removed)
}

async fn replace_service<C: ConnectionTrait>(
    db: &C,
    instance_id: &str,
    service: &Service,
) -> StorageResult<()> {
    ensure_service_free(db, instance_id, service).await?;
    services::Entity::delete_many()
        .filter(services::Column::InstancesGuid.eq(instance_id))
        .exec(db)
        .await
        .map_err(from_db_err)?;
    if service.is_empty() {
        return Ok(());
    }

    let row = services::ActiveModel {
        guid: Set(service.id.clone()),
        bindable: Set(service.bindable),
        dashboard_client: Set(service
            .dashboard_client
            .as_ref()
            .map(to_blob)
            .transpose()?),
        description: Set(service.description.clone()),
        metadata: Set(to_blob(&service.metadata)?),
        name: Set(service.name.clone()),
        plan_updateable: Set(service.plan_updateable),
        tags: Set(to_blob(&service.tags)?),
        instances_guid: Set(instance_id.to_string()),
        requires: Set(to_blob(&service.requires)?),
    };
    services::Entity::insert(row)
        .exec_without_returning(db)
        .await
        .map_err(from_db_err)?;
    Ok(())
}

async fn write_instance(
    txn: &DatabaseTransaction,
    instance_id: &str,
    instance: &Instance,
) -> StorageResult<()> {
    ensure_unique_name(txn, instance_id, &instance.name).await?;
    for dial_id in instance.dials.keys() {
        ensure_dial_free(txn, instance_id, dial_id).await?;
    }

    delete_dials_where(txn, dials::Column::InstancesGuid.eq(instance_id)).await?;

    let row = instances::ActiveModel {
        guid: Set(instance_id.to_string()),
        name: Set(instance.name.clone()),
        target_url: Set(instance.target_url.clone()),
        authentication_key: Set(instance.authentication_key.clone()),
        authentication_secret: Set(instance.authentication_secret.clone()),
        ca_cert: Set(instance.ca_cert.clone()),
        skip_ssl: Set(instance.skip_ssl),
    };
    instances::Entity::insert(row)
        .on_conflict(
            OnConflict::column(instances::Column::Guid)
                .update_columns([
                    instances::Column::Name,
                    instances::Column::TargetUrl,
                    instances::Column::AuthenticationKey,
                    instances::Column::AuthenticationSecret,
                    instances::Column::CaCert,
                    instances::Column::SkipSsl,
                ])
                .to_owned(),
        )
        .exec_without_returning(txn)
        .await
        .map_err(from_db_err)?;

    for (dial_id, dial) in &instance.dials {
        insert_dial(txn, instance_id, dial_id, dial).await?;
    }
    replace_service(txn, instance_id, &instance.service).await
}

async fn remove_instance(txn: &DatabaseTransaction, instance_id: &str) -> StorageResult<()> {
    require_instance(txn, instance_id).await?;
    delete_dials_where(txn, dials::Column::InstancesGuid.eq(instance_id)).await?;
    services::Entity::delete_many()
        .filter(services::Column::InstancesGuid.eq(instance_id))
        .exec(txn)
        .await
        .map_err(from_db_err)?;
    instances::Entity::delete_by_id(instance_id.to_string())
        .exec(txn)
        .await
        .map_err(from_db_err)?;
    Ok(())
}

async fn write_dial(
    txn: &DatabaseTransaction,
    instance_id: &str,
    dial_id: &str,
    dial: &Dial,
) -> StorageResult<()> {
    require_instance(txn, instance_id).await?;
    ensure_dial_free(txn, instance_id, dial_id).await?;
    delete_dials_where(txn, dials::Column::Guid.eq(dial_id)).await?;
    insert_dial(txn, instance_id, dial_id, dial).await
}

#[async_trait]
impl ConfigProvider for SeaOrmProvider {
    async fn initialize_configuration(&self) -> StorageResult<()> {
        observe(BACKEND, "initialize_configuration", async {
            debug!("running relational schema migration");
            run_migrations(self.connection()).await
        })
        .await
    }

    async fn load_configuration(&self) -> StorageResult<Config> {
        observe(BACKEND, "load_configuration", async {
            let db = self.connection();
            let mut plan_rows: HashMap<String, plans::Model> = plans::Entity::find()
                .all(db)
                .await
                .map_err(from_db_err)?
                .into_iter()
                .map(|plan| (plan.guid.clone(), plan))
                .collect();
            let mut dials_by_instance: HashMap<String, BTreeMap<String, Dial>> = HashMap::new();
            for dial in dials::Entity::find().all(db).await.map_err(from_db_err)? {
                let plan = plan_rows
                    .remove(&dial.plans_guid)
                    .ok_or_else(|| missing_plan(&dial.guid, &dial.plans_guid))?;
                dials_by_instance.entry(dial.instances_guid).or_default().insert(
                    dial.guid,
                    Dial {
                        configuration: DialConfiguration::new(dial.configuration),
                        plan: plan_from_model(plan)?,
                    },
                );
            }
            let mut services_by_instance = HashMap::new();
            for service in services::Entity::find().all(db).await.map_err(from_db_err)? {
                let instance_id = service.instances_guid.clone();
                services_by_instance.insert(instance_id, service_from_model(service)?);
            }

            let mut instances = BTreeMap::new();
            for row in instances::Entity::find().all(db).await.map_err(from_db_err)? {
                let dials = dials_by_instance.remove(&row.guid).unwrap_or_default();
                let service = services_by_instance.remove(&row.guid).unwrap_or_default();
                instances.insert(row.guid.clone(), instance_from_model(row, dials, service));
            }
            Ok(Config::from_parts(self.settings().clone(), instances))
        })
        .await
    }

    async fn get_instance(&self, instance_id: &str) -> StorageResult<InstanceEntry> {
        observe(BACKEND, "get_instance", async {
            match read_instance(self.connection(), instance_id).await? {
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
        observe(BACKEND, "set_instance", async {
            rules::check_instance(instance_id, &instance)?;
            debug!(instance_id, dials = instance.dials.len(), "writing instance rows");
            let txn = self.begin().await?;
            let result = write_instance(&txn, instance_id, &instance).await;
            finish(txn, "set_instance", result).await
        })
        .await
    }

    async fn delete_instance(&self, instance_id: &str) -> StorageResult<()> {
        observe(BACKEND, "delete_instance", async {
            let txn = self.begin().await?;
            let result = remove_instance(&txn, instance_id).await;
            finish(txn, "delete_instance", result).await
        })
        .await
    }

    async fn get_service(&self, instance_id: &str) -> StorageResult<Service> {
        observe(BACKEND, "get_service", async {
            services::Entity::find()
                .filter(services::Column::InstancesGuid.eq(instance_id))
                .one(self.connection())
                .await
                .map_err(from_db_err)?
                .map(service_from_model)
                .transpose()?
                .ok_or_else(|| StorageError::not_found("service", instance_id))
        })
        .await
    }

    async fn set_service(&self, instance_id: &str, service: Service) -> StorageResult<()> {
        observe(BACKEND, "set_service", async {
            rules::check_service(instance_id, &service)?;
            let txn = self.begin().await?;
            let result = async {
                require_instance(&txn, instance_id).await?;
                replace_service(&txn, instance_id, &service).await
            }
            .await;
            finish(txn, "set_service", result).await
        })
        .await
    }

    async fn delete_service(&self, instance_id: &str) -> StorageResult<()> {
        observe(BACKEND, "delete_service", async {
            let removed = services::Entity::delete_many()
                .filter(services::Column::InstancesGuid.eq(instance_id))
                .exec(self.connection())
                .await
                .map_err(from_db_err)?
                .rows_affected;
            if removed == 0 {
                return Err(StorageError::not_found("service", instance_id));
            }
            Ok(())
        })
        .await
    }

    async fn get_dial(&self, dial_id: &str) -> StorageResult<DialEntry> {
        observe(BACKEND, "get_dial", async {
            let db = self.connection();
            let row = dials::Entity::find_by_id(dial_id.to_string())
                .one(db)
                .await
                .map_err(from_db_err)?
                .ok_or_else(|| StorageError::not_found("dial", dial_id))?;
            let plan = find_plan(db, &row).await?;
            Ok(DialEntry {
                id: row.guid,
                instance_id: row.instances_guid,
                dial: Dial {
                    configuration: DialConfiguration::new(row.configuration),
                    plan,
                },
            })
        })
        .await
    }

    async fn set_dial(&self, instance_id: &str, dial_id: &str, dial: Dial) -> StorageResult<()> {
        observe(BACKEND, "set_dial", async {
            rules::check_dial(dial_id, &dial)?;
            let txn = self.begin().await?;
            let result = write_dial(&txn, instance_id, dial_id, &dial).await;
            finish(txn, "set_dial", result).await
        })
        .await
    }

    async fn delete_dial(&self, dial_id: &str) -> StorageResult<()> {
        observe(BACKEND, "delete_dial", async {
            let txn = self.begin().await?;
            let result = delete_dials_where(&txn, dials::Column::Guid.eq(dial_id))
                .await
                .and_then(|removed| {
                    if removed == 0 {
                        Err(StorageError::not_found("dial", dial_id))
                    } else {
                        Ok(())
                    }
                });
            finish(txn, "delete_dial", result).await
        })
        .await
    }

    async fn instance_name_exists(&self, name: &str) -> StorageResult<bool> {
        observe(BACKEND, "instance_name_exists", async {
            let rows = instances::Entity::find()
                .all(self.connection())
                .await
                .map_err(from_db_err)?;
            Ok(rows.iter().any(|row| names_collide(&row.name, name)))
        })
        .await
    }

    async fn get_plan(&self, plan_id: &str) -> StorageResult<PlanEntry> {
        observe(BACKEND, "get_plan", async {
            let db = self.connection();
            let plan = plans::Entity::find_by_id(plan_id.to_string())
                .one(db)
                .await
                .map_err(from_db_err)?
                .ok_or_else(|| StorageError::not_found("plan", plan_id))?;
            let owner = dials::Entity::find()
                .filter(dials::Column::PlansGuid.eq(plan_id))
                .order_by_asc(dials::Column::Guid)
                .one(db)
                .await
                .map_err(from_db_err)?
                .ok_or_else(|| StorageError::not_found("plan", plan_id))?;
            Ok(PlanEntry {
                plan: plan_from_model(plan)?,
                dial_id: owner.guid,
                instance_id: owner.instances_guid,
            })
        })
        .await
    }
}

impl SeaOrmProvider {
    async fn begin(&self) -> StorageResult<DatabaseTransaction> {
        self.connection()
            .begin()
            .await
            .map_err(|err| StorageError::Transaction(err.to_string()))
    }
}

/// Commits when `result` is `Ok`, otherwise rolls back and hands the
/// original error back to the caller.
async fn finish(
    txn: DatabaseTransaction,
    operation: &'static str,
    result: StorageResult<()>,
) -> StorageResult<()> {
    match result {
        Ok(()) => txn
            .commit()
            .await
            .map_err(|err| StorageError::Transaction(err.to_string())),
        Err(err) => {
            warn!(operation, error = %err, "rolling back transaction");
            if let Err(rollback) = txn.rollback().await {
                warn!(operation, error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}
