#[allow(warnings, clippy::all)]
pub(crate) mod short_url {
    use sea_orm::entity::prelude::*;

    #[sea_orm::model]
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "urls")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub original_url: String,
        #[sea_orm(unique)]
        pub short_url: String,
        pub creation_time: TimeDateTimeWithTimeZone,
        pub expiration_time: TimeDateTimeWithTimeZone,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

#[allow(warnings, clippy::all)]
pub(crate) mod analytics {
    use sea_orm::entity::prelude::*;

    #[sea_orm::model]
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "analytics")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub short_url: String,
        pub access_time: TimeDateTimeWithTimeZone,
        pub ip_address: String,
    }

    impl ActiveModelBehavior for ActiveModel {}
}
