//! Per-call registry settings. At most one is active per call.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "call_registry_configurations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub call_id: i64,

    pub configuration_id: i64,

    pub name: String,

    /// Organisational unit code
    pub uo: String,

    pub uo_rpa: String,

    pub uo_rpa_username: String,

    pub uo_rpa_matricola: String,

    pub send_email: bool,

    #[sea_orm(nullable)]
    pub email: Option<String>,

    pub cod_titolario: String,

    pub folder_number: String,

    #[sea_orm(nullable)]
    pub folder_year: Option<i32>,

    pub is_active: bool,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::call::Entity",
        from = "Column::CallId",
        to = "super::call::Column::Id"
    )]
    Call,

    #[sea_orm(
        belongs_to = "super::registry_configuration::Entity",
        from = "Column::ConfigurationId",
        to = "super::registry_configuration::Column::Id"
    )]
    Configuration,
}

impl Related<super::call::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Call.def()
    }
}

impl Related<super::registry_configuration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Configuration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
