//! SeaORM entity models
//!
//! Database entities for IASP

mod application;
mod audit_log;
mod call;
mod call_registry_configuration;
mod commission;
mod commission_member;
mod commission_review;
mod free_credits_rule;
mod free_insertion;
mod insertion_ref;
mod registry_configuration;
mod required_insertion;
mod user;

pub use insertion_ref::{InsertionKind, InsertionRef};

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
};

pub use call::{
    Entity as CallEntity,
    Model as Call,
    ActiveModel as CallActiveModel,
    Column as CallColumn,
};

pub use application::{
    Entity as ApplicationEntity,
    Model as Application,
    ActiveModel as ApplicationActiveModel,
    Column as ApplicationColumn,
    Relation as ApplicationRelation,
    DocumentSlot,
    DOMESTIC_COUNTRY,
};

pub use free_credits_rule::{
    Entity as FreeCreditsRuleEntity,
    Model as FreeCreditsRule,
    ActiveModel as FreeCreditsRuleActiveModel,
    Column as FreeCreditsRuleColumn,
};

pub use required_insertion::{
    Entity as RequiredInsertionEntity,
    Model as RequiredInsertion,
    ActiveModel as RequiredInsertionActiveModel,
    Column as RequiredInsertionColumn,
};

pub use free_insertion::{
    Entity as FreeInsertionEntity,
    Model as FreeInsertion,
    ActiveModel as FreeInsertionActiveModel,
    Column as FreeInsertionColumn,
};

pub use commission_review::{
    Entity as CommissionReviewEntity,
    Model as CommissionReview,
    ActiveModel as CommissionReviewActiveModel,
    Column as CommissionReviewColumn,
};

pub use audit_log::{
    Entity as AuditLogEntity,
    Model as AuditLogEntry,
    ActiveModel as AuditLogActiveModel,
    Column as AuditLogColumn,
};

pub use registry_configuration::{
    Entity as RegistryConfigurationEntity,
    Model as RegistryConfiguration,
    ActiveModel as RegistryConfigurationActiveModel,
    Column as RegistryConfigurationColumn,
};

pub use call_registry_configuration::{
    Entity as CallRegistryConfigurationEntity,
    Model as CallRegistryConfiguration,
    ActiveModel as CallRegistryConfigurationActiveModel,
    Column as CallRegistryConfigurationColumn,
};

pub use commission::{
    Entity as CommissionEntity,
    Model as Commission,
    ActiveModel as CommissionActiveModel,
    Column as CommissionColumn,
};

pub use commission_member::{
    Entity as CommissionMemberEntity,
    Model as CommissionMember,
    ActiveModel as CommissionMemberActiveModel,
    Column as CommissionMemberColumn,
    Relation as CommissionMemberRelation,
};
