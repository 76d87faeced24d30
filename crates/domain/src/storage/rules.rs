use crate::model::{Config, Dial, Instance, Service};

use super::{StorageError, StorageResult};

/// Plan and service IDs key rows in the relational schema, so every backend
/// requires them.
pub fn check_dial(dial_id: &str, dial: &Dial) -> StorageResult<()> {
    if dial.plan.id.is_empty() {
        return Err(StorageError::Constraint(format!(
            "dial `{dial_id}` has a plan without id"
        )));
    }
    Ok(())
}

/// An empty service means "none stored" and needs no ID.
pub fn check_service(instance_id: &str, service: &Service) -> StorageResult<()> {
    if !service.is_empty() && service.id.is_empty() {
        return Err(StorageError::Constraint(format!(
            "service of instance `{instance_id}` has no id"
        )));
    }
    Ok(())
}

pub fn check_instance(instance_id: &str, instance: &Instance) -> StorageResult<()> {
    check_service(instance_id, &instance.service)?;
    for (dial_id, dial) in &instance.dials {
        check_dial(dial_id, dial)?;
    }
    Ok(())
}

/// Ownership rules for the in-memory graph: names are unique ignoring case,
/// and dial and service IDs belong to a single instance.
pub fn check_ownership(
    config: &Config,
    instance_id: &str,
    instance: &Instance,
) -> StorageResult<()> {
    if let Some(owner) = config.name_owner_other_than(instance_id, &instance.name) {
        return Err(StorageError::Constraint(format!(
            "instance name `{}` already used by `{owner}`",
            instance.name
        )));
    }
    for dial_id in instance.dials.keys() {
        check_dial_owner(config, instance_id, dial_id)?;
    }
    check_service_owner(config, instance_id, &instance.service)
}

pub fn check_dial_owner(config: &Config, instance_id: &str, dial_id: &str) -> StorageResult<()> {
    match config.dial_owner_other_than(instance_id, dial_id) {
        Some(owner) => Err(dial_taken(dial_id, owner)),
        None => Ok(()),
    }
}

pub fn check_service_owner(
    config: &Config,
    instance_id: &str,
    service: &Service,
) -> StorageResult<()> {
    if service.is_empty() {
        return Ok(());
    }
    match config.service_owner_other_than(instance_id, &service.id) {
        Some(owner) => Err(service_taken(&service.id, owner)),
        None => Ok(()),
    }
}

pub fn dial_taken(dial_id: &str, owner: &str) -> StorageError {
    StorageError::Constraint(format!("dial `{dial_id}` already belongs to `{owner}`"))
}

pub fn service_taken(service_id: &str, owner: &str) -> StorageError {
    StorageError::Constraint(format!("service `{service_id}` already belongs to `{owner}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Plan;

    fn dial(plan_id: &str) -> Dial {
        Dial {
            plan: Plan {
                id: plan_id.into(),
                ..Plan::default()
            },
            ..Dial::default()
        }
    }

    #[test]
    fn plans_and_services_need_ids() {
        assert!(check_dial("d1", &dial("p1")).is_ok());
        assert!(matches!(
            check_dial("d1", &Dial::default()),
            Err(StorageError::Constraint(_))
        ));

        assert!(check_service("i1", &Service::default()).is_ok());
        let unnamed = Service {
            name: "mongodb".into(),
            ..Service::default()
        };
        assert!(matches!(
            check_service("i1", &unnamed),
            Err(StorageError::Constraint(_))
        ));
    }

    #[test]
    fn ownership_rejects_foreign_dials_and_services() {
        let mut owner = Instance {
            name: "first".into(),
            service: Service {
                id: "svc".into(),
                ..Service::default()
            },
            ..Instance::default()
        };
        owner.dials.insert("d1".into(), dial("p1"));
        let mut config = Config::default();
        config.instances.insert("a".into(), owner.clone());

        let mut candidate = Instance {
            name: "second".into(),
            ..Instance::default()
        };
        candidate.dials.insert("d1".into(), dial("p2"));
        assert!(matches!(
            check_ownership(&config, "b", &candidate),
            Err(StorageError::Constraint(_))
        ));

        candidate.dials.clear();
        candidate.service.id = "svc".into();
        assert!(check_ownership(&config, "b", &candidate).is_err());

        // rewriting the owner itself is fine
        assert!(check_ownership(&config, "a", &owner).is_ok());
    }
}
