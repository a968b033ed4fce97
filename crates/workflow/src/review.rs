//! Commission review overlay
//!
//! A review replaces the declared credits of one insertion in the reviewed
//! total; the declared values stay untouched. Every change appends an audit
//! entry with the new values.

use iasp_common::db::models::{Application, AuditLogEntry, Call, CommissionReview, InsertionRef};
use iasp_common::metrics::record_review;
use iasp_common::store::load_application;
use iasp_common::{AppError, ApplicationStore, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

pub const REVIEW_DELETED: &str = "Review deleted";

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewInput {
    pub changed_credits: Decimal,
    pub changed_grade: String,
    #[serde(default)]
    pub notes: String,
}

impl ReviewInput {
    fn audit_text(&self) -> String {
        format!(
            "New credits value: {} / New grade value: {} / Notes: {}",
            self.changed_credits, self.changed_grade, self.notes
        )
    }
}

/// Active member of a commission that is itself in progress for the call
pub async fn ensure_commission_member<S: ApplicationStore + ?Sized>(
    store: &S,
    call_id: i64,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    if store.is_active_commission_member(call_id, user_id, now).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden {
            message: format!("Not an active commission member for call {}", call_id),
        })
    }
}

/// Submitted applications of the call, oldest submission first
pub async fn submitted_applications<S: ApplicationStore + ?Sized>(
    store: &S,
    call_id: i64,
) -> Result<Vec<Application>> {
    store.submitted_applications(call_id).await
}

/// One submitted application of the call. Drafts and applications of other
/// calls are reported as missing.
pub async fn submitted_application<S: ApplicationStore + ?Sized>(
    store: &S,
    call_id: i64,
    application_id: i64,
) -> Result<(Application, Call)> {
    let (application, call) = load_application(store, application_id).await?;
    if application.call_id != call_id || !application.is_submitted() {
        return Err(AppError::not_found("application", application_id));
    }
    Ok((application, call))
}

/// Application owning the insertion, which must belong to `call_id`
async fn owning_application<S: ApplicationStore + ?Sized>(
    store: &S,
    call_id: i64,
    insertion: InsertionRef,
) -> Result<Application> {
    let application_id = match insertion {
        InsertionRef::Required(id) => store.required_insertion(id).await?.map(|i| i.application_id),
        InsertionRef::Free(id) => store.free_insertion(id).await?.map(|i| i.application_id),
    }
    .ok_or_else(|| AppError::not_found("insertion", insertion))?;

    let application = store
        .application(application_id)
        .await?
        .filter(|application| application.call_id == call_id)
        .ok_or_else(|| AppError::not_found("insertion", insertion))?;

    Ok(application)
}

/// Create or update the review of an insertion of a submitted application
pub async fn upsert_review<S: ApplicationStore + ?Sized>(
    store: &S,
    call_id: i64,
    insertion: InsertionRef,
    input: ReviewInput,
    actor: Uuid,
) -> Result<CommissionReview> {
    if input.changed_credits < Decimal::ZERO {
        return Err(AppError::validation("changed_credits", "Credits cannot be negative"));
    }
    if input.changed_grade.trim().is_empty() {
        return Err(AppError::validation("changed_grade", "Grade is required"));
    }

    let application = owning_application(store, call_id, insertion).await?;
    if !application.is_submitted() {
        return Err(AppError::Conflict {
            message: format!("Application {} has not been submitted", application.id),
        });
    }

    let now = Utc::now();
    let existing = store.review(insertion).await?;
    let (required_insertion_id, free_insertion_id) = CommissionReview::columns_for(insertion);

    let review = CommissionReview {
        id: existing.as_ref().map(|r| r.id).unwrap_or_default(),
        required_insertion_id,
        free_insertion_id,
        changed_credits: input.changed_credits,
        changed_grade: input.changed_grade.clone(),
        notes: input.notes.clone(),
        created_by: existing.as_ref().map(|r| r.created_by).unwrap_or(actor),
        modified_by: actor,
        created_at: existing.as_ref().map(|r| r.created_at).unwrap_or(now),
        modified_at: now,
    };

    let saved = store.save_review(review).await?;
    store
        .append_audit_log(insertion, actor, &input.audit_text(), now)
        .await?;
    record_review("upsert");

    info!(
        application_id = application.id,
        insertion = %insertion,
        user_id = %actor,
        changed_credits = %saved.changed_credits,
        created = existing.is_none(),
        "Commission review saved"
    );
    Ok(saved)
}

/// Remove the review of an insertion; `ReviewNotFound` when there is none
pub async fn delete_review<S: ApplicationStore + ?Sized>(
    store: &S,
    call_id: i64,
    insertion: InsertionRef,
    actor: Uuid,
) -> Result<()> {
    let application = owning_application(store, call_id, insertion).await?;

    if store.review(insertion).await?.is_none() {
        return Err(AppError::ReviewNotFound {
            insertion: insertion.to_string(),
        });
    }

    store
        .append_audit_log(insertion, actor, REVIEW_DELETED, Utc::now())
        .await?;
    store.delete_review(insertion).await?;
    record_review("delete");

    info!(
        application_id = application.id,
        insertion = %insertion,
        user_id = %actor,
        "Commission review deleted"
    );
    Ok(())
}

/// Audit trail of an insertion, newest first
pub async fn review_logs<S: ApplicationStore + ?Sized>(
    store: &S,
    call_id: i64,
    insertion: InsertionRef,
) -> Result<Vec<AuditLogEntry>> {
    owning_application(store, call_id, insertion).await?;
    store.audit_log(insertion).await
}
