pub mod instances {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "Instances")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false, column_name = "Guid")]
        pub guid: String,
        #[sea_orm(column_name = "Name")]
        pub name: String,
        #[sea_orm(column_name = "TargetURL")]
        pub target_url: String,
        #[sea_orm(column_name = "AuthenticationKey")]
        pub authentication_key: String,
        #[sea_orm(column_name = "AuthenticationSecret")]
        pub authentication_secret: String,
        #[sea_orm(column_name = "CaCert")]
        pub ca_cert: Option<String>,
        #[sea_orm(column_name = "SkipSsl")]
        pub skip_ssl: bool,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::dials::Entity")]
        Dials,
        #[sea_orm(has_many = "super::services::Entity")]
        Services,
    }

    impl Related<super::dials::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Dials.def()
        }
    }

    impl Related<super::services::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Services.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod plans {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "Plans")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false, column_name = "Guid")]
        pub guid: String,
        #[sea_orm(column_name = "Name")]
        pub name: String,
        #[sea_orm(column_name = "Description")]
        pub description: String,
        #[sea_orm(column_name = "Free")]
        pub free: bool,
        #[sea_orm(column_name = "Metadata")]
        pub metadata: Vec<u8>,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::dials::Entity")]
        Dials,
    }

    impl Related<super::dials::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Dials.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod dials {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "Dials")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false, column_name = "Guid")]
        pub guid: String,
        #[sea_orm(column_name = "Configuration")]
        pub configuration: Vec<u8>,
        #[sea_orm(column_name = "Plans_Guid")]
        pub plans_guid: String,
        #[sea_orm(column_name = "Instances_Guid")]
        pub instances_guid: String,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::instances::Entity",
            from = "Column::InstancesGuid",
            to = "super::instances::Column::Guid"
        )]
        Instances,
        #[sea_orm(
            belongs_to = "super::plans::Entity",
            from = "Column::PlansGuid",
            to = "super::plans::Column::Guid"
        )]
        Plans,
    }

    impl Related<super::instances::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Instances.def()
        }
    }

    impl Related<super::plans::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Plans.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod services {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "Services")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false, column_name = "Guid")]
        pub guid: String,
        #[sea_orm(column_name = "Bindable")]
        pub bindable: bool,
        #[sea_orm(column_name = "DashboardClient")]
        pub dashboard_client: Option<Vec<u8>>,
        #[sea_orm(column_name = "Description")]
        pub description: String,
        #[sea_orm(column_name = "Metadata")]
        pub metadata: Vec<u8>,
        #[sea_orm(column_name = "Name")]
        pub name: String,
        #[sea_orm(column_name = "PlanUpdateable")]
        pub plan_updateable: bool,
        #[sea_orm(column_name = "Tags")]
        pub tags: Vec<u8>,
        #[sea_orm(column_name = "Instances_Guid")]
        pub instances_guid: String,
        #[sea_orm(column_name = "Requires")]
        pub requires: Vec<u8>,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::instances::Entity",
            from = "Column::InstancesGuid",
            to = "super::instances::Column::Guid"
        )]
        Instances,
    }

    impl Related<super::instances::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Instances.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}
