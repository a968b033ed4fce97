//! Commission review overlay on one insertion
//!
//! Exactly one of the two insertion columns is set. Both foreign keys
//! restrict deletion, so a reviewed insertion cannot be removed.

use super::insertion_ref::InsertionRef;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "commission_reviews")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique, nullable)]
    pub required_insertion_id: Option<i64>,

    #[sea_orm(unique, nullable)]
    pub free_insertion_id: Option<i64>,

    #[sea_orm(column_type = "Decimal(Some((4, 1)))")]
    pub changed_credits: Decimal,

    pub changed_grade: String,

    #[sea_orm(column_type = "Text")]
    pub notes: String,

    pub created_by: Uuid,

    pub modified_by: Uuid,

    pub created_at: DateTimeUtc,

    pub modified_at: DateTimeUtc,
}

impl Model {
    pub fn insertion(&self) -> Option<InsertionRef> {
        match (self.required_insertion_id, self.free_insertion_id) {
            (Some(id), None) => Some(InsertionRef::Required(id)),
            (None, Some(id)) => Some(InsertionRef::Free(id)),
            _ => None,
        }
    }

    /// Column values for a reference: (required, free)
    pub fn columns_for(insertion: InsertionRef) -> (Option<i64>, Option<i64>) {
        match insertion {
            InsertionRef::Required(id) => (Some(id), None),
            InsertionRef::Free(id) => (None, Some(id)),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::required_insertion::Entity",
        from = "Column::RequiredInsertionId",
        to = "super::required_insertion::Column::Id",
        on_delete = "Restrict"
    )]
    RequiredInsertion,

    #[sea_orm(
        belongs_to = "super::free_insertion::Entity",
        from = "Column::FreeInsertionId",
        to = "super::free_insertion::Column::Id",
        on_delete = "Restrict"
    )]
    FreeInsertion,
}

impl Related<super::required_insertion::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RequiredInsertion.def()
    }
}

impl Related<super::free_insertion::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FreeInsertion.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
