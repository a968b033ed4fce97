//! Applicant-facing application handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use iasp_common::{
    auth::AuthContext,
    db::models::{Application, Call, DocumentSlot},
    errors::{AppError, Result},
    store::load_application,
};
use iasp_workflow::{
    declared_credits_by_target, documents,
    gate::{self, SubmissionOutcome},
    review::{ensure_commission_member, submitted_application},
    LedgerSnapshot, TargetCredits,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::forms::{read_multipart, validated, DescriptorsForm};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreditsQuery {
    /// Commission view: include the reviewed total
    #[serde(default)]
    pub review: bool,
}

#[derive(Serialize)]
pub struct CreditsResponse {
    pub application_id: i64,
    pub threshold: Decimal,
    pub declared_total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_total: Option<Decimal>,
    pub editable: bool,
    pub submittable: bool,
    /// First mandatory document still missing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_document: Option<String>,
    pub targets: Vec<TargetCredits>,
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub application_id: i64,
    pub slot: DocumentSlot,
    pub path: String,
}

/// Application owned by the caller
pub async fn owned_application(
    state: &AppState,
    auth: &AuthContext,
    application_id: i64,
) -> Result<(Application, Call)> {
    let (application, call) = load_application(state.workflow.store.as_ref(), application_id).await?;
    auth.require_owner(application.user_id)?;
    Ok((application, call))
}

/// Stored PDF sent inline
pub fn pdf_response(file_name: String, bytes: Vec<u8>) -> Response {
    let disposition = format!("inline; filename=\"{}\"", file_name.replace('"', ""));
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

/// Open an application on a call; multipart with a `data` part holding the
/// descriptors and one part per document slot
pub async fn create_application(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(call_id): Path<i64>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Application>)> {
    let parts = read_multipart(multipart).await?;
    let form: DescriptorsForm = parts.form()?;

    let created = documents::create_application(
        &state.workflow,
        call_id,
        auth.user_id,
        form.into(),
        parts.documents,
    )
    .await?;

    tracing::info!(
        application_id = created.id,
        call_id,
        user_id = %auth.user_id,
        request_id = %auth.request_id,
        "Application opened"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// The caller's application
pub async fn get_application(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(application_id): Path<i64>,
) -> Result<Json<Application>> {
    let (application, _) = owned_application(&state, &auth, application_id).await?;
    Ok(Json(application))
}

/// Edit nationality and home university
pub async fn update_application(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(application_id): Path<i64>,
    Json(form): Json<DescriptorsForm>,
) -> Result<Json<Application>> {
    owned_application(&state, &auth, application_id).await?;
    let form = validated(form)?;
    let updated =
        documents::update_descriptors(&state.workflow, application_id, form.into(), auth.user_id).await?;
    Ok(Json(updated))
}

/// Download one of the caller's application documents
pub async fn download_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((application_id, slot)): Path<(i64, String)>,
) -> Result<Response> {
    let slot: DocumentSlot = slot
        .parse()
        .map_err(|message: String| AppError::validation("slot", message))?;
    let (application, _) = owned_application(&state, &auth, application_id).await?;
    let (name, bytes) = documents::read_document(&state.workflow, &application, slot).await?;
    Ok(pdf_response(name, bytes))
}

/// Credit totals and the per-target summary
pub async fn credits(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(application_id): Path<i64>,
    Query(query): Query<CreditsQuery>,
) -> Result<Json<CreditsResponse>> {
    let store = state.workflow.store.as_ref();
    let now = Utc::now();

    let (application, call) = if query.review {
        let (application, _) = load_application(store, application_id).await?;
        ensure_commission_member(store, application.call_id, auth.user_id, now).await?;
        // The commission only sees submitted applications
        submitted_application(store, application.call_id, application_id).await?
    } else {
        owned_application(&state, &auth, application_id).await?
    };

    let snapshot = LedgerSnapshot::load(store, application_id).await?;
    let declared_total = snapshot.total_credits(false);
    let missing_document = match documents::validate_documents(&application) {
        Ok(()) => None,
        Err(AppError::Validation { field, message }) => Some(field.unwrap_or(message)),
        Err(e) => return Err(e),
    };

    Ok(Json(CreditsResponse {
        application_id,
        threshold: call.credits_threshold,
        declared_total,
        reviewed_total: query.review.then(|| snapshot.total_credits(true)),
        editable: gate::can_edit(&application, &call, now),
        submittable: gate::check_submission(&application, &call, declared_total, now).is_ok(),
        missing_document,
        targets: declared_credits_by_target(&snapshot),
    }))
}

/// Submit the application; registration problems still return 200
pub async fn submit(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(application_id): Path<i64>,
) -> Result<Json<SubmissionOutcome>> {
    owned_application(&state, &auth, application_id).await?;

    let outcome = gate::submit(&state.workflow, application_id, auth.user_id).await?;

    tracing::info!(
        application_id,
        user_id = %auth.user_id,
        request_id = %auth.request_id,
        status = ?outcome.status,
        "Submission handled"
    );
    Ok(Json(outcome))
}

/// Delete an application that was never submitted
pub async fn delete_application(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(application_id): Path<i64>,
) -> Result<StatusCode> {
    owned_application(&state, &auth, application_id).await?;
    documents::delete_application(&state.workflow, application_id, auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Upload or replace one of the application documents
pub async fn upload_document(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((application_id, slot)): Path<(i64, String)>,
    multipart: Multipart,
) -> Result<Json<DocumentResponse>> {
    let slot: DocumentSlot = slot
        .parse()
        .map_err(|message: String| AppError::validation("slot", message))?;
    owned_application(&state, &auth, application_id).await?;

    let mut parts = read_multipart(multipart).await?;
    let application = documents::replace_document(&state.workflow, application_id, slot, parts.file()?).await?;

    let path = application.document(slot).unwrap_or_default().to_string();
    Ok(Json(DocumentResponse {
        application_id,
        slot,
        path,
    }))
}
