//! Persistence seam used by the workflow
//!
//! The sea-orm [`Repository`](crate::db::Repository) implements it over
//! PostgreSQL; [`InMemoryStore`] backs tests and local tooling.

mod memory;

pub use memory::InMemoryStore;

use crate::db::models::*;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Everything the workflow reads from and writes to persistent storage
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    // ----- reads -----

    async fn application(&self, id: i64) -> Result<Option<Application>>;

    async fn call(&self, id: i64) -> Result<Option<Call>>;

    async fn user(&self, id: Uuid) -> Result<Option<User>>;

    /// The application of `user_id` on `call_id`, if any
    async fn application_for_call(&self, user_id: Uuid, call_id: i64) -> Result<Option<Application>>;

    /// Submitted applications of a call, oldest submission first
    async fn submitted_applications(&self, call_id: i64) -> Result<Vec<Application>>;

    /// Required insertions ordered by (target year, target code)
    async fn required_insertions(&self, application_id: i64) -> Result<Vec<RequiredInsertion>>;

    /// Free insertions with their rule, ordered by primary key
    async fn free_insertions(
        &self,
        application_id: i64,
    ) -> Result<Vec<(FreeInsertion, FreeCreditsRule)>>;

    async fn required_insertion(&self, id: i64) -> Result<Option<RequiredInsertion>>;

    async fn free_insertion(&self, id: i64) -> Result<Option<FreeInsertion>>;

    async fn free_credits_rule(
        &self,
        call_id: i64,
        course_year: i32,
    ) -> Result<Option<FreeCreditsRule>>;

    /// Reviews of every insertion of an application
    async fn reviews_for_application(&self, application_id: i64) -> Result<Vec<CommissionReview>>;

    async fn review(&self, insertion: InsertionRef) -> Result<Option<CommissionReview>>;

    // ----- insertions -----

    async fn required_insertion_exists(
        &self,
        application_id: i64,
        target_teaching_id: i64,
        source_teaching_cod: &str,
    ) -> Result<bool>;

    async fn free_insertion_exists(
        &self,
        application_id: i64,
        free_credits_rule_id: i64,
        source_teaching_cod: &str,
    ) -> Result<bool>;

    /// Persists a new row; the id of `insertion` is ignored
    async fn insert_required(&self, insertion: RequiredInsertion) -> Result<RequiredInsertion>;

    /// Persists a new row; the id of `insertion` is ignored
    async fn insert_free(&self, insertion: FreeInsertion) -> Result<FreeInsertion>;

    /// Overwrites the source columns of an existing row
    async fn update_required(&self, insertion: &RequiredInsertion) -> Result<()>;

    /// Overwrites the source columns of an existing row
    async fn update_free(&self, insertion: &FreeInsertion) -> Result<()>;

    async fn delete_insertion(&self, insertion: InsertionRef) -> Result<()>;

    // ----- application -----

    /// Persists a new row; the id of `application` is ignored. A second
    /// application of the same user on the same call is a `Conflict`.
    async fn insert_application(&self, application: Application) -> Result<Application>;

    /// Overwrites the applicant-editable fields (documents, descriptors)
    async fn update_application(&self, application: &Application) -> Result<()>;

    async fn mark_submitted(&self, application_id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Removes the application with its insertions
    async fn delete_application(&self, application_id: i64) -> Result<()>;

    // ----- protocol -----

    /// Sets `protocol_taken` only while it is unset. Returns whether this
    /// caller took the claim.
    async fn claim_protocol(&self, application_id: i64, at: DateTime<Utc>) -> Result<bool>;

    /// Writes number and date in one update; the claim stays set
    async fn record_protocol(
        &self,
        application_id: i64,
        number: &str,
        date: DateTime<Utc>,
    ) -> Result<()>;

    async fn release_protocol_claim(&self, application_id: i64) -> Result<()>;

    /// Submitted, unregistered and unclaimed applications of calls that
    /// require registration
    async fn pending_registrations(&self) -> Result<Vec<Application>>;

    async fn active_call_registry_configuration(
        &self,
        call_id: i64,
    ) -> Result<Option<(CallRegistryConfiguration, RegistryConfiguration)>>;

    // ----- reviews -----

    /// Insert or update the review of `review.insertion()`
    async fn save_review(&self, review: CommissionReview) -> Result<CommissionReview>;

    async fn delete_review(&self, insertion: InsertionRef) -> Result<()>;

    async fn append_audit_log(
        &self,
        insertion: InsertionRef,
        created_by: Uuid,
        text: &str,
        at: DateTime<Utc>,
    ) -> Result<AuditLogEntry>;

    /// Newest first
    async fn audit_log(&self, insertion: InsertionRef) -> Result<Vec<AuditLogEntry>>;

    // ----- commissions -----

    async fn is_active_commission_member(
        &self,
        call_id: i64,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Application with its call, the common starting point of every operation
pub async fn load_application<S: ApplicationStore + ?Sized>(
    store: &S,
    application_id: i64,
) -> Result<(Application, Call)> {
    let application = store
        .application(application_id)
        .await?
        .ok_or_else(|| AppError::not_found("application", application_id))?;
    let call = store
        .call(application.call_id)
        .await?
        .ok_or_else(|| AppError::not_found("call", application.call_id))?;
    Ok((application, call))
}
