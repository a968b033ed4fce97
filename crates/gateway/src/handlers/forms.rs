//! Request bodies and multipart parsing
//!
//! Insertion and document uploads are `multipart/form-data` with a `file`
//! part (the PDF) and, for insertions, a `data` part holding the JSON form.
//! A new application sends its `data` part plus one part per document slot,
//! named after the slot (`exams_certification`, `teaching_plan`, ...).

use axum::extract::multipart::{Multipart, MultipartError};
use iasp_common::db::models::DocumentSlot;
use iasp_common::{AppError, Result};
use iasp_workflow::documents::{ApplicantDescriptors, Upload};
use iasp_workflow::insertion::SourceTeaching;
use iasp_workflow::review::ReviewInput;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use validator::Validate;

/// Source teaching as entered by the applicant
#[derive(Debug, Deserialize, Validate)]
pub struct SourceForm {
    #[validate(length(min = 1, max = 255))]
    pub university: String,

    #[validate(length(min = 1, max = 64))]
    pub university_country: String,

    #[serde(default)]
    #[validate(length(max = 255))]
    pub university_city: String,

    #[validate(length(min = 1, max = 255))]
    pub degree_course: String,

    #[validate(length(min = 1, max = 255))]
    pub teaching_name: String,

    #[validate(length(min = 1, max = 64))]
    pub teaching_cod: String,

    #[serde(default)]
    #[validate(length(max = 32))]
    pub teaching_ssd: String,

    pub teaching_credits: Decimal,

    #[validate(length(min = 1, max = 16))]
    pub teaching_grade: String,

    #[serde(default)]
    #[validate(length(max = 500))]
    pub teaching_url: String,

    #[serde(default)]
    #[validate(length(max = 2000))]
    pub notes: String,
}

impl From<SourceForm> for SourceTeaching {
    fn from(form: SourceForm) -> Self {
        SourceTeaching {
            university: form.university,
            university_country: form.university_country,
            university_city: form.university_city,
            degree_course: form.degree_course,
            teaching_name: form.teaching_name,
            teaching_cod: form.teaching_cod,
            teaching_ssd: form.teaching_ssd,
            teaching_credits: form.teaching_credits,
            teaching_grade: form.teaching_grade,
            teaching_url: form.teaching_url,
            notes: form.notes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RequiredForm {
    pub target_teaching_id: i64,

    #[serde(flatten)]
    #[validate(nested)]
    pub source: SourceForm,
}

/// Nationality and home university of the applicant
#[derive(Debug, Deserialize, Validate)]
pub struct DescriptorsForm {
    #[validate(length(equal = 2))]
    pub user_country: String,

    #[validate(length(min = 1, max = 255))]
    pub home_university: String,

    #[validate(length(equal = 2))]
    pub home_country: String,

    #[validate(length(min = 1, max = 255))]
    pub home_city: String,

    #[validate(length(min = 1, max = 255))]
    pub home_course: String,
}

impl From<DescriptorsForm> for ApplicantDescriptors {
    fn from(form: DescriptorsForm) -> Self {
        ApplicantDescriptors {
            user_country: form.user_country,
            home_university: form.home_university,
            home_country: form.home_country,
            home_city: form.home_city,
            home_course: form.home_course,
        }
    }
}

/// Commission review body
#[derive(Debug, Deserialize, Validate)]
pub struct ReviewForm {
    pub changed_credits: Decimal,

    #[validate(length(min = 1, max = 16))]
    pub changed_grade: String,

    #[serde(default)]
    #[validate(length(max = 2000))]
    pub notes: String,
}

impl From<ReviewForm> for ReviewInput {
    fn from(form: ReviewForm) -> Self {
        ReviewInput {
            changed_credits: form.changed_credits,
            changed_grade: form.changed_grade,
            notes: form.notes,
        }
    }
}

/// Run the derived checks, reporting the first failing field
pub fn validated<T: Validate>(form: T) -> Result<T> {
    form.validate().map_err(|e| AppError::Validation {
        field: e.field_errors().keys().next().map(|field| field.to_string()),
        message: e.to_string(),
    })?;
    Ok(form)
}

/// Parts of an upload request
#[derive(Debug, Default)]
pub struct UploadParts {
    pub data: Option<String>,
    pub file: Option<Upload>,
    /// Parts named after a document slot, in upload order
    pub documents: Vec<(DocumentSlot, Upload)>,
}

impl UploadParts {
    pub fn form<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let data = self
            .data
            .as_deref()
            .ok_or_else(|| AppError::validation("data", "Missing form data"))?;
        let form = serde_json::from_str(data).map_err(|e| AppError::Validation {
            message: format!("Invalid form data: {}", e),
            field: Some("data".to_string()),
        })?;
        validated(form)
    }

    pub fn file(&mut self) -> Result<Upload> {
        self.file
            .take()
            .ok_or_else(|| AppError::validation("file", "Missing attachment"))
    }

    /// Attachment of an edit, which may keep the stored one
    pub fn optional_file(&mut self) -> Option<Upload> {
        self.file.take().filter(|upload| !upload.bytes.is_empty())
    }
}

fn bad_multipart(e: MultipartError) -> AppError {
    AppError::Validation {
        message: format!("Malformed upload: {}", e),
        field: None,
    }
}

pub async fn read_multipart(mut multipart: Multipart) -> Result<UploadParts> {
    let mut parts = UploadParts::default();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "data" => parts.data = Some(field.text().await.map_err(bad_multipart)?),
            "file" => {
                let file_name = field.file_name().unwrap_or("attachment.pdf").to_string();
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                parts.file = Some(Upload::new(file_name, bytes.to_vec()));
            }
            other => match other.parse::<DocumentSlot>() {
                Ok(slot) => {
                    let file_name = field.file_name().unwrap_or("document.pdf").to_string();
                    let bytes = field.bytes().await.map_err(bad_multipart)?;
                    parts.documents.push((slot, Upload::new(file_name, bytes.to_vec())));
                }
                Err(_) => tracing::debug!(field = %other, "Ignoring unexpected upload part"),
            },
        }
    }

    Ok(parts)
}
