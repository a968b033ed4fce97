//! Application entity: one per (user, call)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Country code of domestic applicants and universities
pub const DOMESTIC_COUNTRY: &str = "IT";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "applications")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub user_id: Uuid,

    pub call_id: i64,

    /// Applicant nationality (ISO 3166 alpha-2)
    pub user_country: String,

    pub home_university: String,

    /// Home university country (ISO 3166 alpha-2)
    pub home_country: String,

    pub home_city: String,

    pub home_course: String,

    // Document slots, as paths relative to the media root
    #[sea_orm(nullable)]
    pub exams_certification: Option<String>,

    #[sea_orm(nullable)]
    pub teaching_plan: Option<String>,

    #[sea_orm(nullable)]
    pub votes_conversion: Option<String>,

    #[sea_orm(nullable)]
    pub language_certification: Option<String>,

    #[sea_orm(nullable)]
    pub declaration_of_value: Option<String>,

    #[sea_orm(nullable)]
    pub payment_receipt: Option<String>,

    /// Set once on submission
    pub submission_date: Option<DateTimeUtc>,

    /// Empty until registered
    pub protocol_number: String,

    pub protocol_date: Option<DateTimeUtc>,

    /// Registration claim
    pub protocol_taken: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,

    pub modified_at: DateTimeUtc,
}

/// Application-level attachment slots, in bundle order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSlot {
    ExamsCertification,
    TeachingPlan,
    VotesConversion,
    LanguageCertification,
    DeclarationOfValue,
    PaymentReceipt,
}

impl DocumentSlot {
    pub const ALL: [DocumentSlot; 6] = [
        DocumentSlot::ExamsCertification,
        DocumentSlot::TeachingPlan,
        DocumentSlot::VotesConversion,
        DocumentSlot::LanguageCertification,
        DocumentSlot::DeclarationOfValue,
        DocumentSlot::PaymentReceipt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSlot::ExamsCertification => "exams_certification",
            DocumentSlot::TeachingPlan => "teaching_plan",
            DocumentSlot::VotesConversion => "votes_conversion",
            DocumentSlot::LanguageCertification => "language_certification",
            DocumentSlot::DeclarationOfValue => "declaration_of_value",
            DocumentSlot::PaymentReceipt => "payment_receipt",
        }
    }

    pub fn column(&self) -> Column {
        match self {
            DocumentSlot::ExamsCertification => Column::ExamsCertification,
            DocumentSlot::TeachingPlan => Column::TeachingPlan,
            DocumentSlot::VotesConversion => Column::VotesConversion,
            DocumentSlot::LanguageCertification => Column::LanguageCertification,
            DocumentSlot::DeclarationOfValue => Column::DeclarationOfValue,
            DocumentSlot::PaymentReceipt => Column::PaymentReceipt,
        }
    }
}

impl std::str::FromStr for DocumentSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentSlot::ALL
            .into_iter()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| format!("unknown document slot: {}", s))
    }
}

impl Model {
    /// Stored path of a document slot, if uploaded
    pub fn document(&self, slot: DocumentSlot) -> Option<&str> {
        let value = match slot {
            DocumentSlot::ExamsCertification => &self.exams_certification,
            DocumentSlot::TeachingPlan => &self.teaching_plan,
            DocumentSlot::VotesConversion => &self.votes_conversion,
            DocumentSlot::LanguageCertification => &self.language_certification,
            DocumentSlot::DeclarationOfValue => &self.declaration_of_value,
            DocumentSlot::PaymentReceipt => &self.payment_receipt,
        };
        value.as_deref().filter(|path| !path.is_empty())
    }

    pub fn set_document(&mut self, slot: DocumentSlot, path: Option<String>) {
        let target = match slot {
            DocumentSlot::ExamsCertification => &mut self.exams_certification,
            DocumentSlot::TeachingPlan => &mut self.teaching_plan,
            DocumentSlot::VotesConversion => &mut self.votes_conversion,
            DocumentSlot::LanguageCertification => &mut self.language_certification,
            DocumentSlot::DeclarationOfValue => &mut self.declaration_of_value,
            DocumentSlot::PaymentReceipt => &mut self.payment_receipt,
        };
        *target = path;
    }

    pub fn is_submitted(&self) -> bool {
        self.submission_date.is_some()
    }

    pub fn is_registered(&self) -> bool {
        self.protocol_date.is_some() && !self.protocol_number.is_empty()
    }

    pub fn is_domestic_applicant(&self) -> bool {
        self.user_country.eq_ignore_ascii_case(DOMESTIC_COUNTRY)
    }

    pub fn is_domestic_university(&self) -> bool {
        self.home_country.eq_ignore_ascii_case(DOMESTIC_COUNTRY)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,

    #[sea_orm(
        belongs_to = "super::call::Entity",
        from = "Column::CallId",
        to = "super::call::Column::Id"
    )]
    Call,

    #[sea_orm(has_many = "super::required_insertion::Entity")]
    RequiredInsertions,

    #[sea_orm(has_many = "super::free_insertion::Entity")]
    FreeInsertions,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::call::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Call.def()
    }
}

impl Related<super::required_insertion::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RequiredInsertions.def()
    }
}

impl Related<super::free_insertion::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FreeInsertions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
