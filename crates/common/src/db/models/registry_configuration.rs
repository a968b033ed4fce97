//! Global registry credentials

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "registry_configurations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub name: String,

    pub username: String,

    #[serde(skip_serializing)]
    pub password: String,

    /// Homogeneous organisational area code
    pub aoo: String,

    pub agd: String,

    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::call_registry_configuration::Entity")]
    CallConfigurations,
}

impl Related<super::call_registry_configuration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CallConfigurations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
