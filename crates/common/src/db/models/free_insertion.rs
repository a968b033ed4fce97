//! Free insertion: a source teaching claimed against a free credits rule

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "free_insertions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub application_id: i64,

    pub free_credits_rule_id: i64,

    pub source_university: String,
    pub source_university_country: String,
    pub source_university_city: String,
    pub source_degree_course: String,
    pub source_teaching_name: String,
    pub source_teaching_cod: String,
    pub source_teaching_ssd: String,
    #[sea_orm(column_type = "Decimal(Some((4, 1)))")]
    pub source_teaching_credits: Decimal,
    pub source_teaching_grade: String,
    pub source_teaching_attachment: String,
    /// Public page of the source teaching, empty when not given
    pub source_teaching_url: String,
    #[sea_orm(column_type = "Text")]
    pub notes: String,

    pub created_by: Uuid,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::application::Entity",
        from = "Column::ApplicationId",
        to = "super::application::Column::Id",
        on_delete = "Cascade"
    )]
    Application,

    #[sea_orm(
        belongs_to = "super::free_credits_rule::Entity",
        from = "Column::FreeCreditsRuleId",
        to = "super::free_credits_rule::Column::Id"
    )]
    FreeCreditsRule,
}

impl Related<super::application::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Application.def()
    }
}

impl Related<super::free_credits_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FreeCreditsRule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
