use std::time::Duration;

use usb_domain::model::{
    Dial, DialConfiguration, Instance, Plan, PlanMetadata, Service, ServiceMetadata,
};
use usb_domain::storage::{ConfigProvider, StorageError};

use crate::{
    BlobDocument, DocumentProvider, FileDocument, FsTree, MemoryBlobStore, MemoryTree,
    SeaOrmProvider, TreeProvider,
};

fn plan(id: &str) -> Plan {
    Plan {
        id: id.to_string(),
        name: format!("{id}-name"),
        description: format!("{id} plan"),
        free: false,
        metadata: PlanMetadata {
            display_name: id.to_uppercase(),
            bullets: vec!["10 GB".into(), "backups".into()],
        },
    }
}

fn dial(plan_id: &str) -> Dial {
    Dial {
        configuration: DialConfiguration::new(br#"{"nodes":3}"#.to_vec()),
        plan: plan(plan_id),
    }
}

fn service(id: &str) -> Service {
    Service {
        id: id.to_string(),
        name: "mongodb".into(),
        description: "document store".into(),
        bindable: true,
        plan_updateable: false,
        tags: vec!["nosql".into()],
        requires: Vec::new(),
        metadata: ServiceMetadata {
            display_name: "MongoDB".into(),
            provider_display_name: "USB".into(),
            ..ServiceMetadata::default()
        },
        dashboard_client: None,
    }
}

fn instance(name: &str, dials: &[(&str, &str)]) -> Instance {
    Instance {
        name: name.to_string(),
        target_url: "https://driver.example:8443".into(),
        authentication_key: "driver".into(),
        authentication_secret: "driver-secret".into(),
        ca_cert: Some("-----BEGIN CERTIFICATE-----".into()),
        skip_ssl: true,
        dials: dials
            .iter()
            .map(|(dial_id, plan_id)| (dial_id.to_string(), dial(plan_id)))
            .collect(),
        service: service(&format!("{name}-svc")),
    }
}

fn assert_not_found<T: std::fmt::Debug>(result: Result<T, StorageError>) {
    match result {
        Err(err) => assert!(err.is_not_found(), "expected not found, got {err:?}"),
        Ok(value) => panic!("expected not found, got {value:?}"),
    }
}

/// Behaviour every backend shares.
async fn exercise_contract(provider: &dyn ConfigProvider) {
    provider.initialize_configuration().await.unwrap();
    assert!(provider.load_configuration().await.unwrap().instances.is_empty());

    // round trip
    let alpha = instance("Alpha", &[("dial-1", "plan-1"), ("dial-2", "plan-2")]);
    provider.set_instance("inst-a", alpha.clone()).await.unwrap();
    let entry = provider.get_instance("inst-a").await.unwrap();
    assert_eq!(entry.id, "inst-a");
    assert_eq!(entry.instance, alpha);
    let config = provider.load_configuration().await.unwrap();
    assert_eq!(config.instances.get("inst-a"), Some(&alpha));

    // plan and dial resolution
    let plan_entry = provider.get_plan("plan-2").await.unwrap();
    assert_eq!(plan_entry.dial_id, "dial-2");
    assert_eq!(plan_entry.instance_id, "inst-a");
    assert_eq!(plan_entry.plan, plan("plan-2"));
    let dial_entry = provider.get_dial("dial-1").await.unwrap();
    assert_eq!(dial_entry.instance_id, "inst-a");
    assert_eq!(dial_entry.dial, dial("plan-1"));

    // names are unique regardless of case
    assert!(provider.instance_name_exists("ALPHA").await.unwrap());
    assert!(!provider.instance_name_exists("Beta").await.unwrap());
    let err = provider
        .set_instance("inst-b", instance("alpha", &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Constraint(_)), "got {err:?}");
    assert_not_found(provider.get_instance("inst-b").await);

    // narrow dial writes
    provider.set_dial("inst-a", "dial-3", dial("plan-3")).await.unwrap();
    assert_eq!(provider.get_plan("plan-3").await.unwrap().dial_id, "dial-3");
    provider.delete_dial("dial-1").await.unwrap();
    assert_not_found(provider.get_dial("dial-1").await);
    assert_not_found(provider.get_plan("plan-1").await);
    assert_not_found(provider.delete_dial("dial-1").await);
    assert_not_found(provider.set_dial("missing", "dial-9", dial("plan-9")).await);

    // narrow service writes
    assert_eq!(provider.get_service("inst-a").await.unwrap(), service("Alpha-svc"));
    provider.set_service("inst-a", service("replacement")).await.unwrap();
    assert_eq!(provider.get_service("inst-a").await.unwrap().id, "replacement");
    provider.delete_service("inst-a").await.unwrap();
    assert_not_found(provider.get_service("inst-a").await);
    assert_not_found(provider.delete_service("inst-a").await);
    assert_not_found(provider.set_service("missing", service("x")).await);

    // set_instance replaces the dial set
    provider
        .set_instance("inst-a", instance("Alpha", &[("dial-4", "plan-4")]))
        .await
        .unwrap();
    let dials = provider.get_instance("inst-a").await.unwrap().instance.dials;
    assert_eq!(dials.keys().collect::<Vec<_>>(), vec!["dial-4"]);
    assert_not_found(provider.get_plan("plan-2").await);

    // delete cascades to dials and service
    provider
        .set_instance("inst-b", instance("Beta", &[("dial-5", "plan-5")]))
        .await
        .unwrap();
    provider.delete_instance("inst-a").await.unwrap();
    assert_not_found(provider.get_instance("inst-a").await);
    assert_not_found(provider.get_dial("dial-4").await);
    assert_not_found(provider.get_plan("plan-4").await);
    assert_not_found(provider.get_service("inst-a").await);
    assert_not_found(provider.delete_instance("inst-a").await);
    assert!(!provider.instance_name_exists("alpha").await.unwrap());

    let remaining = provider.load_configuration().await.unwrap();
    assert_eq!(remaining.instances.keys().collect::<Vec<_>>(), vec!["inst-b"]);
    assert_eq!(provider.get_plan("plan-5").await.unwrap().instance_id, "inst-b");

    exercise_ownership(provider).await;
    exercise_payloads(provider).await;
}

/// IDs that key rows must be present, and dials and services belong to one
/// instance. Expects `inst-b` (Beta) holding `dial-5`.
async fn exercise_ownership(provider: &dyn ConfigProvider) {
    let assert_constraint = |result: Result<(), StorageError>| match result {
        Err(StorageError::Constraint(_)) => {}
        other => panic!("expected constraint error, got {other:?}"),
    };

    let mut unplanned = dial("plan-x");
    unplanned.plan.id.clear();
    assert_constraint(provider.set_dial("inst-b", "dial-x", unplanned).await);
    let anonymous = Service {
        id: String::new(),
        ..service("ignored")
    };
    assert_constraint(provider.set_service("inst-b", anonymous).await);

    provider.set_instance("inst-c", instance("Gamma", &[])).await.unwrap();
    assert_constraint(provider.set_dial("inst-c", "dial-5", dial("plan-6")).await);
    assert_constraint(provider.set_service("inst-c", service("Beta-svc")).await);
    assert_constraint(
        provider
            .set_instance("inst-c", instance("Gamma", &[("dial-5", "plan-7")]))
            .await,
    );

    let dial_entry = provider.get_dial("dial-5").await.unwrap();
    assert_eq!(dial_entry.instance_id, "inst-b");
    assert_eq!(dial_entry.dial, dial("plan-5"));
    assert_eq!(provider.get_service("inst-c").await.unwrap(), service("Gamma-svc"));
    assert_not_found(provider.get_plan("plan-6").await);
    provider.delete_instance("inst-c").await.unwrap();
}

/// Dial configurations come back byte for byte, JSON or not.
async fn exercise_payloads(provider: &dyn ConfigProvider) {
    let payloads: [&[u8]; 3] = [b"user=x;pw=y", br#"{"b":1, "a":2}"#, br#"{"b":1,"a":2}"#];
    for (n, bytes) in payloads.iter().enumerate() {
        let dial_id = format!("raw-{n}");
        let raw = Dial {
            configuration: DialConfiguration::new(bytes.to_vec()),
            plan: plan(&format!("raw-plan-{n}")),
        };
        provider.set_dial("inst-b", &dial_id, raw).await.unwrap();

        let stored = provider.get_dial(&dial_id).await.unwrap().dial;
        assert_eq!(stored.configuration.as_bytes(), *bytes);
        let config = provider.load_configuration().await.unwrap();
        let loaded = &config.instances["inst-b"].dials[&dial_id];
        assert_eq!(loaded.configuration.as_bytes(), *bytes);
    }
}

/// Two instances carrying dials for one plan. Scan backends resolve the
/// plan to the first dial in instance ID then dial ID order; the relational
/// Plans key refuses the second dial.
async fn exercise_shared_plan(provider: &dyn ConfigProvider, duplicates_allowed: bool) {
    provider.initialize_configuration().await.unwrap();
    provider
        .set_instance("inst-a", instance("Alpha", &[("dial-2", "shared")]))
        .await
        .unwrap();
    let second = provider
        .set_instance("inst-b", instance("Beta", &[("dial-0", "shared")]))
        .await;

    if !duplicates_allowed {
        assert!(matches!(second, Err(StorageError::Constraint(_))), "got {second:?}");
        assert_eq!(provider.get_plan("shared").await.unwrap().dial_id, "dial-2");
        return;
    }
    second.unwrap();
    let entry = provider.get_plan("shared").await.unwrap();
    assert_eq!((entry.instance_id.as_str(), entry.dial_id.as_str()), ("inst-a", "dial-2"));

    provider.delete_dial("dial-2").await.unwrap();
    let entry = provider.get_plan("shared").await.unwrap();
    assert_eq!((entry.instance_id.as_str(), entry.dial_id.as_str()), ("inst-b", "dial-0"));
}

fn blob_document() -> BlobDocument<MemoryBlobStore> {
    BlobDocument::new(MemoryBlobStore::new(), "usb/config", Duration::from_secs(60))
}

#[tokio::test]
async fn file_document_honours_contract() {
    let dir = tempfile::tempdir().unwrap();
    let provider = DocumentProvider::new(FileDocument::new(dir.path().join("config.json")));
    exercise_contract(&provider).await;
}

#[tokio::test]
async fn shared_plans_resolve_in_scan_order() {
    let dir = tempfile::tempdir().unwrap();
    let file = DocumentProvider::new(FileDocument::new(dir.path().join("config.json")));
    exercise_shared_plan(&file, true).await;
    exercise_shared_plan(&DocumentProvider::new(blob_document()), true).await;
    exercise_shared_plan(&TreeProvider::new(MemoryTree::new(), "usb"), true).await;
    let fs = TreeProvider::new(FsTree::new(dir.path().join("tree")), "usb");
    exercise_shared_plan(&fs, true).await;
}

#[tokio::test]
async fn sqlite_refuses_shared_plans() {
    let provider = SeaOrmProvider::connect("sqlite::memory:").await.unwrap();
    exercise_shared_plan(&provider, false).await;
}

#[tokio::test]
async fn yaml_file_document_honours_contract() {
    let dir = tempfile::tempdir().unwrap();
    let provider = DocumentProvider::new(FileDocument::new(dir.path().join("config.yml")));
    exercise_contract(&provider).await;
}

#[tokio::test]
async fn blob_document_honours_contract() {
    let provider = DocumentProvider::new(blob_document());
    exercise_contract(&provider).await;
}

#[tokio::test]
async fn memory_tree_honours_contract() {
    let provider = TreeProvider::new(MemoryTree::new(), "usb");
    exercise_contract(&provider).await;
}

#[tokio::test]
async fn fs_tree_honours_contract() {
    let dir = tempfile::tempdir().unwrap();
    let provider = TreeProvider::new(FsTree::new(dir.path()), "usb");
    exercise_contract(&provider).await;
}

#[tokio::test]
async fn sqlite_honours_contract() {
    let provider = SeaOrmProvider::connect("sqlite::memory:").await.unwrap();
    exercise_contract(&provider).await;
}

#[tokio::test]
async fn builder_migrates_on_build() {
    let provider = SeaOrmProvider::builder()
        .database_url("sqlite::memory:")
        .build()
        .await
        .unwrap();
    assert!(provider.load_configuration().await.unwrap().instances.is_empty());
}
