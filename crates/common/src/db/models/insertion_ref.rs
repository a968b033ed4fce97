//! Typed reference to either kind of insertion

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of insertion, stored as a string column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum InsertionKind {
    #[sea_orm(string_value = "required")]
    Required,
    #[sea_orm(string_value = "free")]
    Free,
}

impl InsertionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsertionKind::Required => "required",
            InsertionKind::Free => "free",
        }
    }
}

impl std::str::FromStr for InsertionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "required" => Ok(InsertionKind::Required),
            "free" => Ok(InsertionKind::Free),
            other => Err(format!("unknown insertion kind: {}", other)),
        }
    }
}

/// Reference to one insertion row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum InsertionRef {
    Required(i64),
    Free(i64),
}

impl InsertionRef {
    pub fn new(kind: InsertionKind, id: i64) -> Self {
        match kind {
            InsertionKind::Required => InsertionRef::Required(id),
            InsertionKind::Free => InsertionRef::Free(id),
        }
    }

    pub fn kind(&self) -> InsertionKind {
        match self {
            InsertionRef::Required(_) => InsertionKind::Required,
            InsertionRef::Free(_) => InsertionKind::Free,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            InsertionRef::Required(id) | InsertionRef::Free(id) => *id,
        }
    }
}

impl fmt::Display for InsertionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} insertion #{}", self.kind().as_str(), self.id())
    }
}
