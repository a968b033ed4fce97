//! Commission handlers
//!
//! Every route requires active membership in an in-progress commission of
//! the call named in the path. Only submitted applications are visible.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use iasp_common::{
    auth::AuthContext,
    db::models::{
        Application, AuditLogEntry, CommissionReview, DocumentSlot, FreeInsertion, InsertionRef,
        RequiredInsertion,
    },
    errors::{AppError, Result},
};
use iasp_workflow::{documents, insertion, review, LedgerSnapshot};
use rust_decimal::Decimal;
use serde::Serialize;

use super::applications::pdf_response;
use super::forms::{validated, ReviewForm};
use super::insertions::insertion_ref;
use crate::AppState;

#[derive(Serialize)]
pub struct ApplicationSummary {
    pub application_id: i64,
    pub applicant: String,
    pub submission_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol_number: String,
    pub declared_total: Decimal,
    pub reviewed_total: Decimal,
}

#[derive(Serialize)]
pub struct ReviewedRequired {
    #[serde(flatten)]
    pub insertion: RequiredInsertion,
    pub review: Option<CommissionReview>,
}

#[derive(Serialize)]
pub struct ReviewedFree {
    #[serde(flatten)]
    pub insertion: FreeInsertion,
    pub course_year: i32,
    pub max_value: Decimal,
    pub review: Option<CommissionReview>,
}

#[derive(Serialize)]
pub struct ApplicationDetail {
    pub application: Application,
    pub applicant: String,
    pub email: String,
    pub threshold: Decimal,
    pub declared_total: Decimal,
    pub reviewed_total: Decimal,
    pub required: Vec<ReviewedRequired>,
    pub free: Vec<ReviewedFree>,
}

async fn member(state: &AppState, auth: &AuthContext, call_id: i64) -> Result<()> {
    review::ensure_commission_member(state.workflow.store.as_ref(), call_id, auth.user_id, Utc::now()).await
}

/// Submitted applications of the call with their totals
pub async fn list_applications(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(call_id): Path<i64>,
) -> Result<Json<Vec<ApplicationSummary>>> {
    member(&state, &auth, call_id).await?;
    let store = state.workflow.store.as_ref();

    let applications = review::submitted_applications(store, call_id).await?;
    let mut summaries = Vec::with_capacity(applications.len());
    for application in applications {
        let snapshot = LedgerSnapshot::load(store, application.id).await?;
        let applicant = store
            .user(application.user_id)
            .await?
            .map(|user| user.full_name())
            .unwrap_or_default();
        summaries.push(ApplicationSummary {
            application_id: application.id,
            applicant,
            submission_date: application.submission_date,
            protocol_number: application.protocol_number,
            declared_total: snapshot.total_credits(false),
            reviewed_total: snapshot.total_credits(true),
        });
    }

    Ok(Json(summaries))
}

/// A submitted application with its insertions and their reviews
pub async fn application_detail(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((call_id, application_id)): Path<(i64, i64)>,
) -> Result<Json<ApplicationDetail>> {
    member(&state, &auth, call_id).await?;
    let store = state.workflow.store.as_ref();

    let (application, call) = review::submitted_application(store, call_id, application_id).await?;
    let user = store
        .user(application.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user", application.user_id))?;
    let snapshot = LedgerSnapshot::load(store, application_id).await?;
    let declared_total = snapshot.total_credits(false);
    let reviewed_total = snapshot.total_credits(true);

    let LedgerSnapshot {
        required,
        free,
        mut reviews,
        ..
    } = snapshot;
    let required = required
        .into_iter()
        .map(|insertion| ReviewedRequired {
            review: reviews.remove(&InsertionRef::Required(insertion.id)),
            insertion,
        })
        .collect();
    let free = free
        .into_iter()
        .map(|(insertion, rule)| ReviewedFree {
            review: reviews.remove(&InsertionRef::Free(insertion.id)),
            course_year: rule.course_year,
            max_value: rule.max_value,
            insertion,
        })
        .collect();

    Ok(Json(ApplicationDetail {
        application,
        applicant: user.full_name(),
        email: user.email,
        threshold: call.credits_threshold,
        declared_total,
        reviewed_total,
        required,
        free,
    }))
}

/// Download a document of a submitted application
pub async fn download_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((call_id, application_id, slot)): Path<(i64, i64, String)>,
) -> Result<Response> {
    let slot: DocumentSlot = slot
        .parse()
        .map_err(|message: String| AppError::validation("slot", message))?;
    member(&state, &auth, call_id).await?;

    let (application, _) =
        review::submitted_application(state.workflow.store.as_ref(), call_id, application_id).await?;
    let (name, bytes) = documents::read_document(&state.workflow, &application, slot).await?;
    Ok(pdf_response(name, bytes))
}

/// Download an insertion attachment of a submitted application
pub async fn download_attachment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((call_id, application_id, kind, insertion_id)): Path<(i64, i64, String, i64)>,
) -> Result<Response> {
    let reference = insertion_ref(&kind, insertion_id)?;
    member(&state, &auth, call_id).await?;

    review::submitted_application(state.workflow.store.as_ref(), call_id, application_id).await?;
    let (name, bytes) = insertion::read_attachment(&state.workflow, application_id, reference).await?;
    Ok(pdf_response(name, bytes))
}

async fn authorized(
    state: &AppState,
    auth: &AuthContext,
    call_id: i64,
    kind: &str,
    insertion_id: i64,
) -> Result<InsertionRef> {
    let insertion = insertion_ref(kind, insertion_id)?;
    member(state, auth, call_id).await?;
    Ok(insertion)
}

/// Create or update the review of an insertion
pub async fn upsert_review(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((call_id, kind, insertion_id)): Path<(i64, String, i64)>,
    Json(form): Json<ReviewForm>,
) -> Result<Json<CommissionReview>> {
    let insertion = authorized(&state, &auth, call_id, &kind, insertion_id).await?;
    let form = validated(form)?;

    let saved = review::upsert_review(
        state.workflow.store.as_ref(),
        call_id,
        insertion,
        form.into(),
        auth.user_id,
    )
    .await?;

    Ok(Json(saved))
}

pub async fn delete_review(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((call_id, kind, insertion_id)): Path<(i64, String, i64)>,
) -> Result<StatusCode> {
    let insertion = authorized(&state, &auth, call_id, &kind, insertion_id).await?;
    review::delete_review(state.workflow.store.as_ref(), call_id, insertion, auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Audit trail of an insertion, newest first
pub async fn review_logs(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((call_id, kind, insertion_id)): Path<(i64, String, i64)>,
) -> Result<Json<Vec<AuditLogEntry>>> {
    let insertion = authorized(&state, &auth, call_id, &kind, insertion_id).await?;
    let logs = review::review_logs(state.workflow.store.as_ref(), call_id, insertion).await?;
    Ok(Json(logs))
}
