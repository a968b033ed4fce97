//! Applications and their documents
//!
//! Creation and editing of an application (descriptors plus the six
//! document slots), document downloads and removal of a whole application
//! with its stored files.

use crate::assembly::discard_generated;
use crate::gate::can_edit;
use crate::Workflow;
use chrono::Utc;
use iasp_common::db::models::{Application, Call, DocumentSlot};
use iasp_common::storage::application_folder;
use iasp_common::store::load_application;
use iasp_common::{AppError, Result};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Nationality and home university of the applicant
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicantDescriptors {
    pub user_country: String,
    pub home_university: String,
    pub home_country: String,
    pub home_city: String,
    pub home_course: String,
}

impl ApplicantDescriptors {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("user_country", &self.user_country),
            ("home_country", &self.home_country),
        ] {
            let value = value.trim();
            if value.len() != 2 || !value.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(AppError::validation(field, "Expected a two-letter country code"));
            }
        }
        for (field, value) in [
            ("home_university", &self.home_university),
            ("home_city", &self.home_city),
            ("home_course", &self.home_course),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::validation(field, "This field is required"));
            }
        }
        Ok(())
    }

    fn apply(self, application: &mut Application) {
        application.user_country = self.user_country.trim().to_ascii_uppercase();
        application.home_university = self.home_university.trim().to_string();
        application.home_country = self.home_country.trim().to_ascii_uppercase();
        application.home_city = self.home_city.trim().to_string();
        application.home_course = self.home_course.trim().to_string();
    }
}

/// An uploaded file
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// PDF content within the size limit
    pub fn validate(&self, field: &str, max_bytes: u64) -> Result<()> {
        if self.bytes.is_empty() {
            return Err(AppError::validation(field, "The file is empty"));
        }
        if self.bytes.len() as u64 > max_bytes {
            return Err(AppError::validation(
                field,
                format!(
                    "Excessive file size: {} bytes. Max {} bytes",
                    self.bytes.len(),
                    max_bytes
                ),
            ));
        }
        let is_pdf_name = self.file_name.to_ascii_lowercase().ends_with(".pdf");
        if !is_pdf_name || !self.bytes.starts_with(b"%PDF") {
            return Err(AppError::validation(field, "Only PDF files are accepted"));
        }
        Ok(())
    }

    /// Unique file name under `folder`, keeping a readable suffix
    pub fn stored_path(&self, folder: &str) -> String {
        let base: String = self
            .file_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let token = Uuid::new_v4().simple().to_string();
        format!("{}/{}-{}", folder, &token[..8], base.trim_start_matches('.'))
    }
}

/// Mandatory documents by nationality and home country
pub fn validate_documents(application: &Application) -> Result<()> {
    let missing = |slot: DocumentSlot| application.document(slot).is_none();

    if missing(DocumentSlot::ExamsCertification) {
        return Err(AppError::validation(
            DocumentSlot::ExamsCertification.as_str(),
            "Signed self-certification of taken exams is mandatory",
        ));
    }
    if missing(DocumentSlot::TeachingPlan) {
        return Err(AppError::validation(
            DocumentSlot::TeachingPlan.as_str(),
            "Origin course study plan is mandatory",
        ));
    }
    if !application.is_domestic_applicant() && missing(DocumentSlot::LanguageCertification) {
        return Err(AppError::validation(
            DocumentSlot::LanguageCertification.as_str(),
            "Mandatory for non-Italian users",
        ));
    }
    if !application.is_domestic_university() {
        for slot in [DocumentSlot::VotesConversion, DocumentSlot::DeclarationOfValue] {
            if missing(slot) {
                return Err(AppError::validation(
                    slot.as_str(),
                    "Mandatory if coming from a non-Italian university",
                ));
            }
        }
    }
    Ok(())
}

/// Open a new application of `actor` on an in-progress call.
///
/// `uploads` fill the document slots; the result must satisfy the mandatory
/// document rules. One application per user and call.
pub async fn create_application(
    workflow: &Workflow,
    call_id: i64,
    actor: Uuid,
    descriptors: ApplicantDescriptors,
    uploads: Vec<(DocumentSlot, Upload)>,
) -> Result<Application> {
    let store = workflow.store.as_ref();
    let now = Utc::now();

    let call = store
        .call(call_id)
        .await?
        .ok_or_else(|| AppError::not_found("call", call_id))?;
    if !call.is_in_progress(now) {
        return Err(AppError::Conflict {
            message: format!("Call {} is not accepting applications", call_id),
        });
    }
    if let Some(existing) = store.application_for_call(actor, call_id).await? {
        return Err(AppError::Conflict {
            message: format!(
                "There is already an application against you for this call ({})",
                existing.id
            ),
        });
    }
    let user = store
        .user(actor)
        .await?
        .ok_or_else(|| AppError::not_found("user", actor))?;

    descriptors.validate()?;

    let mut application = Application {
        id: 0,
        user_id: actor,
        call_id,
        user_country: String::new(),
        home_university: String::new(),
        home_country: String::new(),
        home_city: String::new(),
        home_course: String::new(),
        exams_certification: None,
        teaching_plan: None,
        votes_conversion: None,
        language_certification: None,
        declaration_of_value: None,
        payment_receipt: None,
        submission_date: None,
        protocol_number: String::new(),
        protocol_date: None,
        protocol_taken: None,
        created_at: now,
        modified_at: now,
    };
    descriptors.apply(&mut application);

    let folder = application_folder(call_id, &user.taxpayer_id);
    let mut staged: Vec<(String, Vec<u8>)> = Vec::with_capacity(uploads.len());
    for (slot, upload) in uploads {
        if application.document(slot).is_some() {
            return Err(AppError::validation(slot.as_str(), "Uploaded more than once"));
        }
        upload.validate(slot.as_str(), workflow.storage_config.max_upload_bytes)?;
        let path = upload.stored_path(&folder);
        application.set_document(slot, Some(path.clone()));
        staged.push((path, upload.bytes));
    }
    validate_documents(&application)?;

    let mut saved_paths = Vec::with_capacity(staged.len());
    for (path, bytes) in &staged {
        if let Err(e) = workflow.storage.save(path, bytes).await {
            discard_files(workflow, &saved_paths).await;
            return Err(e);
        }
        saved_paths.push(path.clone());
    }

    let created = match store.insert_application(application).await {
        Ok(created) => created,
        Err(e) => {
            discard_files(workflow, &saved_paths).await;
            return Err(e);
        }
    };

    info!(
        application_id = created.id,
        call_id,
        user_id = %actor,
        documents = saved_paths.len(),
        "Application created"
    );
    Ok(created)
}

/// Change nationality and home university while the application is editable
pub async fn update_descriptors(
    workflow: &Workflow,
    application_id: i64,
    descriptors: ApplicantDescriptors,
    actor: Uuid,
) -> Result<Application> {
    let store = workflow.store.as_ref();
    let (mut application, call) = load_application(store, application_id).await?;

    if !can_edit(&application, &call, Utc::now()) {
        return Err(AppError::NotEditable { application_id });
    }
    descriptors.validate()?;
    descriptors.apply(&mut application);
    // A new nationality or home country may call for more documents
    validate_documents(&application)?;

    application.modified_at = Utc::now();
    store.update_application(&application).await?;

    info!(application_id, user_id = %actor, "Application descriptors updated");
    Ok(application)
}

/// File name and content of a stored document
pub async fn read_document(
    workflow: &Workflow,
    application: &Application,
    slot: DocumentSlot,
) -> Result<(String, Vec<u8>)> {
    let path = application
        .document(slot)
        .ok_or_else(|| AppError::not_found("document", slot.as_str()))?;
    let bytes = workflow.storage.read(path).await?;
    Ok((file_name(path), bytes))
}

/// Last segment of a stored path
pub fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

async fn discard_files(workflow: &Workflow, paths: &[String]) {
    for path in paths {
        if let Err(e) = workflow.storage.delete(path).await {
            warn!(path = %path, error = %e, "Could not remove orphaned upload");
        }
    }
}

/// The payment receipt may still be uploaded after submission while the
/// call is open, requires payment and none is on file
fn slot_writable(application: &Application, call: &Call, slot: DocumentSlot) -> bool {
    let now = Utc::now();
    if can_edit(application, call, now) {
        return true;
    }
    slot == DocumentSlot::PaymentReceipt
        && call.payment_required
        && call.is_in_progress(now)
        && application.document(DocumentSlot::PaymentReceipt).is_none()
}

/// Store a new file for `slot` and delete the one it replaces
pub async fn replace_document(
    workflow: &Workflow,
    application_id: i64,
    slot: DocumentSlot,
    upload: Upload,
) -> Result<Application> {
    let store = workflow.store.as_ref();
    let (mut application, call) = load_application(store, application_id).await?;

    if !slot_writable(&application, &call, slot) {
        return Err(AppError::NotEditable { application_id });
    }
    upload.validate(slot.as_str(), workflow.storage_config.max_upload_bytes)?;

    let user = store
        .user(application.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user", application.user_id))?;

    let folder = application_folder(call.id, &user.taxpayer_id);
    let path = upload.stored_path(&folder);
    workflow.storage.save(&path, &upload.bytes).await?;

    let previous = application.document(slot).map(str::to_string);
    application.set_document(slot, Some(path.clone()));
    application.modified_at = Utc::now();

    if let Err(e) = store.update_application(&application).await {
        // Keep storage consistent with the row
        if let Err(cleanup) = workflow.storage.delete(&path).await {
            warn!(path = %path, error = %cleanup, "Could not remove orphaned upload");
        }
        return Err(e);
    }

    if let Some(previous) = previous {
        if let Err(e) = workflow.storage.delete(&previous).await {
            warn!(application_id, path = %previous, error = %e, "Could not delete replaced document");
        }
    }

    info!(application_id, slot = slot.as_str(), path = %path, "Document replaced");
    Ok(application)
}

/// Delete an application that was never submitted, with its files
pub async fn delete_application(workflow: &Workflow, application_id: i64, actor: Uuid) -> Result<()> {
    let store = workflow.store.as_ref();
    let (application, call) = load_application(store, application_id).await?;

    if application.is_submitted() {
        return Err(AppError::NotEditable { application_id });
    }

    let user = store
        .user(application.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user", application.user_id))?;

    workflow
        .storage
        .delete_tree(&application_folder(call.id, &user.taxpayer_id))
        .await?;
    discard_generated(&workflow.storage, &workflow.storage_config, application_id).await?;
    store.delete_application(application_id).await?;

    info!(application_id, call_id = call.id, user_id = %actor, "Application deleted");
    Ok(())
}
