//! Required insertion: a source teaching claimed against a target teaching
//! of the degree plan. The target descriptor is snapshotted from the catalog
//! at creation time.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "required_insertions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub application_id: i64,

    // Source teaching
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

    // Target teaching snapshot
    pub target_teaching_id: i64,
    pub target_teaching_cod: String,
    pub target_teaching_name: String,
    #[sea_orm(column_type = "Decimal(Some((4, 1)))")]
    pub target_teaching_credits: Decimal,
    pub target_teaching_ssd: String,
    pub target_teaching_year: i32,

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
}

impl Related<super::application::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Application.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
