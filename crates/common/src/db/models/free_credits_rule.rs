//! Free elective credits band, per call and course year

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "free_credits_rules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub call_id: i64,

    pub course_year: i32,

    #[sea_orm(column_type = "Decimal(Some((4, 1)))")]
    pub min_value: Decimal,

    /// Cap on the credits of each free insertion under this rule
    #[sea_orm(column_type = "Decimal(Some((4, 1)))")]
    pub max_value: Decimal,

    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::call::Entity",
        from = "Column::CallId",
        to = "super::call::Column::Id"
    )]
    Call,

    #[sea_orm(has_many = "super::free_insertion::Entity")]
    FreeInsertions,
}

impl Related<super::call::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Call.def()
    }
}

impl Related<super::free_insertion::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FreeInsertions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
