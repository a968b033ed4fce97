//! Call entity: one admission cycle with its credit policy

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "calls")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub title_it: String,

    pub title_en: String,

    pub is_active: bool,

    /// Applications are editable in `[start, end)`
    pub start: DateTimeUtc,

    pub end: DateTimeUtc,

    /// Minimum declared credits for submission
    #[sea_orm(column_type = "Decimal(Some((4, 1)))")]
    pub credits_threshold: Decimal,

    /// Insertions for later course years are not counted
    pub credits_reference_year: i32,

    pub payment_required: bool,

    #[sea_orm(column_type = "Text", nullable)]
    pub payment_url: Option<String>,

    pub protocol_required: bool,

    pub insertions_only_from_same_course: bool,

    /// Study plan code selecting the plan tab in the catalog snapshot
    pub study_plan_cod: String,

    /// Curriculum catalog snapshot
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub course_studyplans: Option<Json>,

    pub created_at: DateTimeUtc,
}

impl Model {
    /// Active and inside its window
    pub fn is_in_progress(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start <= now && now < self.end
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::application::Entity")]
    Applications,

    #[sea_orm(has_many = "super::free_credits_rule::Entity")]
    FreeCreditsRules,

    #[sea_orm(has_many = "super::call_registry_configuration::Entity")]
    RegistryConfigurations,
}

impl Related<super::application::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Applications.def()
    }
}

impl Related<super::free_credits_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FreeCreditsRules.def()
    }
}

impl Related<super::call_registry_configuration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RegistryConfigurations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
