//! Review audit log. Entries point at an insertion by (kind, id) for
//! lookup only; there is no foreign key.

use super::insertion_ref::{InsertionKind, InsertionRef};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "review_audit_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub insertion_kind: InsertionKind,

    pub insertion_id: i64,

    pub created_by: Uuid,

    #[sea_orm(column_type = "Text")]
    pub text: String,

    pub created_at: DateTimeUtc,
}

impl Model {
    pub fn insertion(&self) -> InsertionRef {
        InsertionRef::new(self.insertion_kind, self.insertion_id)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
