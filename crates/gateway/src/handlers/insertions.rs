//! Insertion handlers

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use iasp_common::{
    auth::AuthContext,
    db::models::{FreeInsertion, InsertionRef, RequiredInsertion},
    errors::{AppError, Result},
};
use iasp_workflow::insertion;
use rust_decimal::Decimal;
use serde::Serialize;

use super::applications::{owned_application, pdf_response};
use super::forms::{read_multipart, RequiredForm, SourceForm};
use crate::AppState;

#[derive(Serialize)]
pub struct FreeInsertionView {
    #[serde(flatten)]
    pub insertion: FreeInsertion,
    pub course_year: i32,
    pub max_value: Decimal,
}

#[derive(Serialize)]
pub struct InsertionsResponse {
    pub required: Vec<RequiredInsertion>,
    pub free: Vec<FreeInsertionView>,
}

/// Insertions of an application, in bundle order
pub async fn list(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(application_id): Path<i64>,
) -> Result<Json<InsertionsResponse>> {
    owned_application(&state, &auth, application_id).await?;

    let required = insertion::list_required(&state.workflow, application_id).await?;
    let free = insertion::list_free(&state.workflow, application_id)
        .await?
        .into_iter()
        .map(|(insertion, rule)| FreeInsertionView {
            insertion,
            course_year: rule.course_year,
            max_value: rule.max_value,
        })
        .collect();

    Ok(Json(InsertionsResponse { required, free }))
}

/// Add a required insertion; multipart with `data` and `file` parts
pub async fn create_required(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(application_id): Path<i64>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<RequiredInsertion>)> {
    owned_application(&state, &auth, application_id).await?;

    let mut parts = read_multipart(multipart).await?;
    let form: RequiredForm = parts.form()?;
    let upload = parts.file()?;

    let created = insertion::create_required(
        &state.workflow,
        application_id,
        form.target_teaching_id,
        form.source.into(),
        upload,
        auth.user_id,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Edit a required insertion; the `file` part is optional
pub async fn update_required(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((application_id, insertion_id)): Path<(i64, i64)>,
    multipart: Multipart,
) -> Result<Json<RequiredInsertion>> {
    owned_application(&state, &auth, application_id).await?;

    let mut parts = read_multipart(multipart).await?;
    let form: SourceForm = parts.form()?;
    let upload = parts.optional_file();

    let updated = insertion::update_required(
        &state.workflow,
        application_id,
        insertion_id,
        form.into(),
        upload,
        auth.user_id,
    )
    .await?;

    Ok(Json(updated))
}

pub async fn delete_required(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((application_id, insertion_id)): Path<(i64, i64)>,
) -> Result<StatusCode> {
    owned_application(&state, &auth, application_id).await?;
    insertion::delete_required(&state.workflow, application_id, insertion_id, auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add a free insertion under the rule of `course_year`
pub async fn create_free(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((application_id, course_year)): Path<(i64, i32)>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<FreeInsertion>)> {
    owned_application(&state, &auth, application_id).await?;

    let mut parts = read_multipart(multipart).await?;
    let form: SourceForm = parts.form()?;
    let upload = parts.file()?;

    let created = insertion::create_free(
        &state.workflow,
        application_id,
        course_year,
        form.into(),
        upload,
        auth.user_id,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Edit a free insertion; the `file` part is optional
pub async fn update_free(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((application_id, insertion_id)): Path<(i64, i64)>,
    multipart: Multipart,
) -> Result<Json<FreeInsertion>> {
    owned_application(&state, &auth, application_id).await?;

    let mut parts = read_multipart(multipart).await?;
    let form: SourceForm = parts.form()?;
    let upload = parts.optional_file();

    let updated = insertion::update_free(
        &state.workflow,
        application_id,
        insertion_id,
        form.into(),
        upload,
        auth.user_id,
    )
    .await?;

    Ok(Json(updated))
}

/// `required` or `free` followed by the insertion id
pub fn insertion_ref(kind: &str, id: i64) -> Result<InsertionRef> {
    match kind {
        "required" => Ok(InsertionRef::Required(id)),
        "free" => Ok(InsertionRef::Free(id)),
        other => Err(AppError::validation(
            "kind",
            format!("Unknown insertion kind: {}", other),
        )),
    }
}

/// Download the attachment of one of the caller's insertions
pub async fn download_attachment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((application_id, kind, insertion_id)): Path<(i64, String, i64)>,
) -> Result<Response> {
    let insertion = insertion_ref(&kind, insertion_id)?;
    owned_application(&state, &auth, application_id).await?;
    let (name, bytes) = insertion::read_attachment(&state.workflow, application_id, insertion).await?;
    Ok(pdf_response(name, bytes))
}

pub async fn delete_free(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((application_id, insertion_id)): Path<(i64, i64)>,
) -> Result<StatusCode> {
    owned_application(&state, &auth, application_id).await?;
    insertion::delete_free(&state.workflow, application_id, insertion_id, auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
