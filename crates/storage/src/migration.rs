use sea_orm::sea_query::{ColumnDef, ForeignKey, ForeignKeyAction, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{dials, instances, plans, services};
use crate::errors::from_db_err;
use usb_domain::storage::StorageResult;

/// Forward-only schema step. Safe to re-run: every table is created with
/// `IF NOT EXISTS`.
pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let instances_table = Table::create()
        .table(instances::Entity)
        .col(
            ColumnDef::new(instances::Column::Guid)
                .string_len(255)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(instances::Column::Name).string().not_null())
        .col(ColumnDef::new(instances::Column::TargetUrl).string().not_null())
        .col(
            ColumnDef::new(instances::Column::AuthenticationKey)
                .string()
                .not_null(),
        )
        .col(
            ColumnDef::new(instances::Column::AuthenticationSecret)
                .string()
                .not_null(),
        )
        .col(ColumnDef::new(instances::Column::CaCert).text().null())
        .col(
            ColumnDef::new(instances::Column::SkipSsl)
                .boolean()
                .not_null()
                .default(false),
        )
        .to_owned();
    create_table(db, backend, instances_table).await?;

    let plans_table = Table::create()
        .table(plans::Entity)
        .col(
            ColumnDef::new(plans::Column::Guid)
                .string_len(255)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(plans::Column::Name).string().not_null())
        .col(ColumnDef::new(plans::Column::Description).text().not_null())
        .col(
            ColumnDef::new(plans::Column::Free)
                .boolean()
                .not_null()
                .default(false),
        )
        .col(ColumnDef::new(plans::Column::Metadata).binary().not_null())
        .to_owned();
    create_table(db, backend, plans_table).await?;

    let dials_table = Table::create()
        .table(dials::Entity)
        .col(
            ColumnDef::new(dials::Column::Guid)
                .string_len(255)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(dials::Column::Configuration).binary().not_null())
        .col(
            ColumnDef::new(dials::Column::PlansGuid)
                .string_len(255)
                .not_null(),
        )
        .col(
            ColumnDef::new(dials::Column::InstancesGuid)
                .string_len(255)
                .not_null(),
        )
        .foreign_key(
            ForeignKey::create()
                .name("fk_dials_plans")
                .from(dials::Entity, dials::Column::PlansGuid)
                .to(plans::Entity, plans::Column::Guid)
                .on_delete(ForeignKeyAction::Restrict),
        )
        .foreign_key(
            ForeignKey::create()
                .name("fk_dials_instances")
                .from(dials::Entity, dials::Column::InstancesGuid)
                .to(instances::Entity, instances::Column::Guid)
                .on_delete(ForeignKeyAction::Restrict),
        )
        .to_owned();
    create_table(db, backend, dials_table).await?;

    let services_table = Table::create()
        .table(services::Entity)
        .col(
            ColumnDef::new(services::Column::Guid)
                .string_len(255)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(services::Column::Bindable)
                .boolean()
                .not_null()
                .default(false),
        )
        .col(ColumnDef::new(services::Column::DashboardClient).binary().null())
        .col(ColumnDef::new(services::Column::Description).text().not_null())
        .col(ColumnDef::new(services::Column::Metadata).binary().not_null())
        .col(ColumnDef::new(services::Column::Name).string().not_null())
        .col(
            ColumnDef::new(services::Column::PlanUpdateable)
                .boolean()
                .not_null()
                .default(false),
        )
        .col(ColumnDef::new(services::Column::Tags).binary().not_null())
        .col(
            ColumnDef::new(services::Column::InstancesGuid)
                .string_len(255)
                .not_null(),
        )
        .col(ColumnDef::new(services::Column::Requires).binary().not_null())
        .foreign_key(
            ForeignKey::create()
                .name("fk_services_instances")
                .from(services::Entity, services::Column::InstancesGuid)
                .to(instances::Entity, instances::Column::Guid)
                .on_delete(ForeignKeyAction::Restrict),
        )
        .to_owned();
    create_table(db, backend, services_table).await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(from_db_err)?;
    Ok(())
}
