//! Insertion management
//!
//! Applicants claim source teachings either against a target teaching of the
//! degree plan (required insertions) or against the free credits rule of a
//! course year (free insertions). Each insertion carries one PDF attachment.

use crate::catalog::Catalog;
use crate::documents::{file_name, Upload};
use crate::gate::can_edit;
use crate::Workflow;
use chrono::Utc;
use iasp_common::db::models::{
    Application, Call, FreeCreditsRule, FreeInsertion, InsertionRef, RequiredInsertion, User,
};
use iasp_common::storage::{free_attachment_folder, required_attachment_folder};
use iasp_common::store::load_application;
use iasp_common::{AppError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Teaching taken at the home university
#[derive(Debug, Clone, Deserialize)]
pub struct SourceTeaching {
    pub university: String,
    pub university_country: String,
    #[serde(default)]
    pub university_city: String,
    pub degree_course: String,
    pub teaching_name: String,
    pub teaching_cod: String,
    #[serde(default)]
    pub teaching_ssd: String,
    pub teaching_credits: Decimal,
    pub teaching_grade: String,
    #[serde(default)]
    pub teaching_url: String,
    #[serde(default)]
    pub notes: String,
}

impl SourceTeaching {
    /// Calls restricted to the home course take the university and course
    /// from the application
    fn pinned_to_home(mut self, application: &Application, call: &Call) -> Self {
        if call.insertions_only_from_same_course {
            self.university = application.home_university.clone();
            self.university_country = application.home_country.clone();
            self.university_city = application.home_city.clone();
            self.degree_course = application.home_course.clone();
        }
        self
    }

    fn validate(&self, application: &Application) -> Result<()> {
        let mandatory = [
            ("source_university", &self.university),
            ("source_university_country", &self.university_country),
            ("source_degree_course", &self.degree_course),
            ("source_teaching_name", &self.teaching_name),
            ("source_teaching_cod", &self.teaching_cod),
            ("source_teaching_grade", &self.teaching_grade),
        ];
        for (field, value) in mandatory {
            if value.trim().is_empty() {
                return Err(AppError::validation(field, "This field is required"));
            }
        }
        if application.is_domestic_university() && self.teaching_ssd.trim().is_empty() {
            return Err(AppError::validation(
                "source_teaching_ssd",
                "Mandatory for Italian universities",
            ));
        }
        if self.teaching_credits < Decimal::ZERO {
            return Err(AppError::validation(
                "source_teaching_credits",
                "Credits cannot be negative",
            ));
        }
        let url = self.teaching_url.trim();
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AppError::validation("source_teaching_url", "Enter a valid URL"));
        }
        Ok(())
    }
}

/// Editable application with its call and applicant
async fn editable(workflow: &Workflow, application_id: i64) -> Result<(Application, Call, User)> {
    let store = workflow.store.as_ref();
    let (application, call) = load_application(store, application_id).await?;
    if !can_edit(&application, &call, Utc::now()) {
        return Err(AppError::NotEditable { application_id });
    }
    let user = store
        .user(application.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user", application.user_id))?;
    Ok((application, call, user))
}

/// Claim `source` against a target teaching of the call's degree plan
pub async fn create_required(
    workflow: &Workflow,
    application_id: i64,
    target_teaching_id: i64,
    source: SourceTeaching,
    upload: Upload,
    actor: Uuid,
) -> Result<RequiredInsertion> {
    let (application, call, user) = editable(workflow, application_id).await?;

    let target = Catalog::from_call(&call)?
        .teaching(target_teaching_id)
        .ok_or_else(|| AppError::not_found("target teaching", target_teaching_id))?;

    let source = source.pinned_to_home(&application, &call);
    source.validate(&application)?;
    upload.validate(
        "source_teaching_attachment",
        workflow.storage_config.max_upload_bytes,
    )?;

    let store = workflow.store.as_ref();
    if store
        .required_insertion_exists(application_id, target_teaching_id, &source.teaching_cod)
        .await?
    {
        return Err(AppError::DuplicateInsertion {
            target: target.cod,
            source_teaching_cod: source.teaching_cod,
        });
    }

    let folder = required_attachment_folder(call.id, &user.taxpayer_id, target.year);
    let attachment = upload.stored_path(&folder);
    workflow.storage.save(&attachment, &upload.bytes).await?;

    let insertion = RequiredInsertion {
        id: 0,
        application_id,
        source_university: source.university,
        source_university_country: source.university_country,
        source_university_city: source.university_city,
        source_degree_course: source.degree_course,
        source_teaching_name: source.teaching_name,
        source_teaching_cod: source.teaching_cod,
        source_teaching_ssd: source.teaching_ssd,
        source_teaching_credits: source.teaching_credits,
        source_teaching_grade: source.teaching_grade,
        source_teaching_attachment: attachment.clone(),
        source_teaching_url: source.teaching_url.trim().to_string(),
        notes: source.notes,
        target_teaching_id: target.id,
        target_teaching_cod: target.cod,
        target_teaching_name: target.name,
        target_teaching_credits: target.credits,
        target_teaching_ssd: target.ssd,
        target_teaching_year: target.year,
        created_by: actor,
        created_at: Utc::now(),
    };

    let saved = match store.insert_required(insertion).await {
        Ok(saved) => saved,
        Err(e) => {
            discard_attachment(workflow, &attachment).await;
            return Err(e);
        }
    };

    info!(
        application_id,
        insertion_id = saved.id,
        target = %saved.target_teaching_cod,
        source = %saved.source_teaching_cod,
        user_id = %actor,
        "Required insertion created"
    );
    Ok(saved)
}

/// Claim `source` against the free credits rule of `course_year`
pub async fn create_free(
    workflow: &Workflow,
    application_id: i64,
    course_year: i32,
    source: SourceTeaching,
    upload: Upload,
    actor: Uuid,
) -> Result<FreeInsertion> {
    let (application, call, user) = editable(workflow, application_id).await?;
    let store = workflow.store.as_ref();

    let rule = store
        .free_credits_rule(call.id, course_year)
        .await?
        .filter(|rule| rule.is_active)
        .ok_or_else(|| {
            AppError::not_found("free credits rule", format!("{}/{}", call.id, course_year))
        })?;

    let source = source.pinned_to_home(&application, &call);
    source.validate(&application)?;
    upload.validate(
        "source_teaching_attachment",
        workflow.storage_config.max_upload_bytes,
    )?;

    if store
        .free_insertion_exists(application_id, rule.id, &source.teaching_cod)
        .await?
    {
        return Err(AppError::DuplicateInsertion {
            target: format!("free credits of year {}", rule.course_year),
            source_teaching_cod: source.teaching_cod,
        });
    }

    let folder = free_attachment_folder(call.id, &user.taxpayer_id, rule.course_year);
    let attachment = upload.stored_path(&folder);
    workflow.storage.save(&attachment, &upload.bytes).await?;

    let insertion = FreeInsertion {
        id: 0,
        application_id,
        free_credits_rule_id: rule.id,
        source_university: source.university,
        source_university_country: source.university_country,
        source_university_city: source.university_city,
        source_degree_course: source.degree_course,
        source_teaching_name: source.teaching_name,
        source_teaching_cod: source.teaching_cod,
        source_teaching_ssd: source.teaching_ssd,
        source_teaching_credits: source.teaching_credits,
        source_teaching_grade: source.teaching_grade,
        source_teaching_attachment: attachment.clone(),
        source_teaching_url: source.teaching_url.trim().to_string(),
        notes: source.notes,
        created_by: actor,
        created_at: Utc::now(),
    };

    let saved = match store.insert_free(insertion).await {
        Ok(saved) => saved,
        Err(e) => {
            discard_attachment(workflow, &attachment).await;
            return Err(e);
        }
    };

    info!(
        application_id,
        insertion_id = saved.id,
        course_year,
        source = %saved.source_teaching_cod,
        user_id = %actor,
        "Free insertion created"
    );
    Ok(saved)
}

/// Replace the source teaching of a required insertion, and its attachment
/// when a new one is given. The target snapshot is kept.
pub async fn update_required(
    workflow: &Workflow,
    application_id: i64,
    insertion_id: i64,
    source: SourceTeaching,
    upload: Option<Upload>,
    actor: Uuid,
) -> Result<RequiredInsertion> {
    let (application, call, user) = editable(workflow, application_id).await?;
    let store = workflow.store.as_ref();

    let current = store
        .required_insertion(insertion_id)
        .await?
        .filter(|i| i.application_id == application_id)
        .ok_or_else(|| AppError::not_found("insertion", InsertionRef::Required(insertion_id)))?;

    let source = source.pinned_to_home(&application, &call);
    source.validate(&application)?;
    if source.teaching_cod != current.source_teaching_cod
        && store
            .required_insertion_exists(application_id, current.target_teaching_id, &source.teaching_cod)
            .await?
    {
        return Err(AppError::DuplicateInsertion {
            target: current.target_teaching_cod,
            source_teaching_cod: source.teaching_cod,
        });
    }

    let folder = required_attachment_folder(call.id, &user.taxpayer_id, current.target_teaching_year);
    let replacement = store_replacement(workflow, upload, &folder).await?;

    let updated = RequiredInsertion {
        source_university: source.university,
        source_university_country: source.university_country,
        source_university_city: source.university_city,
        source_degree_course: source.degree_course,
        source_teaching_name: source.teaching_name,
        source_teaching_cod: source.teaching_cod,
        source_teaching_ssd: source.teaching_ssd,
        source_teaching_credits: source.teaching_credits,
        source_teaching_grade: source.teaching_grade,
        source_teaching_attachment: replacement
            .clone()
            .unwrap_or_else(|| current.source_teaching_attachment.clone()),
        source_teaching_url: source.teaching_url.trim().to_string(),
        notes: source.notes,
        ..current.clone()
    };

    finish_update(
        workflow,
        store.update_required(&updated).await,
        replacement.as_deref(),
        &current.source_teaching_attachment,
    )
    .await?;

    info!(application_id, insertion_id, user_id = %actor, "Required insertion updated");
    Ok(updated)
}

/// Replace the source teaching of a free insertion, and its attachment when
/// a new one is given
pub async fn update_free(
    workflow: &Workflow,
    application_id: i64,
    insertion_id: i64,
    source: SourceTeaching,
    upload: Option<Upload>,
    actor: Uuid,
) -> Result<FreeInsertion> {
    let (application, call, user) = editable(workflow, application_id).await?;
    let store = workflow.store.as_ref();

    let (current, rule) = store
        .free_insertions(application_id)
        .await?
        .into_iter()
        .find(|(insertion, _)| insertion.id == insertion_id)
        .ok_or_else(|| AppError::not_found("insertion", InsertionRef::Free(insertion_id)))?;

    let source = source.pinned_to_home(&application, &call);
    source.validate(&application)?;
    if source.teaching_cod != current.source_teaching_cod
        && store
            .free_insertion_exists(application_id, rule.id, &source.teaching_cod)
            .await?
    {
        return Err(AppError::DuplicateInsertion {
            target: format!("free credits of year {}", rule.course_year),
            source_teaching_cod: source.teaching_cod,
        });
    }

    let folder = free_attachment_folder(call.id, &user.taxpayer_id, rule.course_year);
    let replacement = store_replacement(workflow, upload, &folder).await?;

    let updated = FreeInsertion {
        source_university: source.university,
        source_university_country: source.university_country,
        source_university_city: source.university_city,
        source_degree_course: source.degree_course,
        source_teaching_name: source.teaching_name,
        source_teaching_cod: source.teaching_cod,
        source_teaching_ssd: source.teaching_ssd,
        source_teaching_credits: source.teaching_credits,
        source_teaching_grade: source.teaching_grade,
        source_teaching_attachment: replacement
            .clone()
            .unwrap_or_else(|| current.source_teaching_attachment.clone()),
        source_teaching_url: source.teaching_url.trim().to_string(),
        notes: source.notes,
        ..current.clone()
    };

    finish_update(
        workflow,
        store.update_free(&updated).await,
        replacement.as_deref(),
        &current.source_teaching_attachment,
    )
    .await?;

    info!(application_id, insertion_id, user_id = %actor, "Free insertion updated");
    Ok(updated)
}

/// Validate and store a replacement attachment, returning its path
async fn store_replacement(workflow: &Workflow, upload: Option<Upload>, folder: &str) -> Result<Option<String>> {
    let Some(upload) = upload else {
        return Ok(None);
    };
    upload.validate(
        "source_teaching_attachment",
        workflow.storage_config.max_upload_bytes,
    )?;
    let path = upload.stored_path(folder);
    workflow.storage.save(&path, &upload.bytes).await?;
    Ok(Some(path))
}

/// Delete-on-replace: the old attachment goes once the row points at the new
/// one; a failed write drops the new one instead
async fn finish_update(
    workflow: &Workflow,
    written: Result<()>,
    replacement: Option<&str>,
    previous: &str,
) -> Result<()> {
    if let Err(e) = written {
        if let Some(path) = replacement {
            discard_attachment(workflow, path).await;
        }
        return Err(e);
    }
    if replacement.is_some() {
        discard_attachment(workflow, previous).await;
    }
    Ok(())
}

/// Stored attachment path of an insertion belonging to `application_id`
async fn owned_attachment(workflow: &Workflow, application_id: i64, insertion: InsertionRef) -> Result<String> {
    let store = workflow.store.as_ref();
    let owner_and_attachment = match insertion {
        InsertionRef::Required(id) => store
            .required_insertion(id)
            .await?
            .map(|i| (i.application_id, i.source_teaching_attachment)),
        InsertionRef::Free(id) => store
            .free_insertion(id)
            .await?
            .map(|i| (i.application_id, i.source_teaching_attachment)),
    };
    match owner_and_attachment {
        Some((owner, attachment)) if owner == application_id => Ok(attachment),
        _ => Err(AppError::not_found("insertion", insertion)),
    }
}

/// File name and content of an insertion attachment
pub async fn read_attachment(
    workflow: &Workflow,
    application_id: i64,
    insertion: InsertionRef,
) -> Result<(String, Vec<u8>)> {
    let path = owned_attachment(workflow, application_id, insertion).await?;
    let bytes = workflow.storage.read(&path).await?;
    Ok((file_name(&path), bytes))
}

/// Remove an insertion of an editable application and its attachment
async fn delete_insertion(
    workflow: &Workflow,
    application_id: i64,
    insertion: InsertionRef,
    actor: Uuid,
) -> Result<()> {
    editable(workflow, application_id).await?;
    let store = workflow.store.as_ref();
    let attachment = owned_attachment(workflow, application_id, insertion).await?;

    if store.review(insertion).await?.is_some() {
        return Err(AppError::Conflict {
            message: format!("{} has a commission review and cannot be deleted", insertion),
        });
    }

    store.delete_insertion(insertion).await?;
    discard_attachment(workflow, &attachment).await;

    info!(application_id, insertion = %insertion, user_id = %actor, "Insertion deleted");
    Ok(())
}

pub async fn delete_required(
    workflow: &Workflow,
    application_id: i64,
    insertion_id: i64,
    actor: Uuid,
) -> Result<()> {
    delete_insertion(workflow, application_id, InsertionRef::Required(insertion_id), actor).await
}

pub async fn delete_free(
    workflow: &Workflow,
    application_id: i64,
    insertion_id: i64,
    actor: Uuid,
) -> Result<()> {
    delete_insertion(workflow, application_id, InsertionRef::Free(insertion_id), actor).await
}

/// Required insertions ordered by (target year, target code)
pub async fn list_required(workflow: &Workflow, application_id: i64) -> Result<Vec<RequiredInsertion>> {
    workflow.store.required_insertions(application_id).await
}

/// Free insertions with their rule, ordered by id
pub async fn list_free(
    workflow: &Workflow,
    application_id: i64,
) -> Result<Vec<(FreeInsertion, FreeCreditsRule)>> {
    let mut rows = workflow.store.free_insertions(application_id).await?;
    rows.sort_by_key(|(insertion, _)| insertion.id);
    Ok(rows)
}

async fn discard_attachment(workflow: &Workflow, path: &str) {
    if path.is_empty() {
        return;
    }
    if let Err(e) = workflow.storage.delete(path).await {
        warn!(path = %path, error = %e, "Could not delete insertion attachment");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(ssd: &str, credits: i64) -> SourceTeaching {
        SourceTeaching {
            university: "Università di Roma".into(),
            university_country: "IT".into(),
            university_city: "Roma".into(),
            degree_course: "Informatica".into(),
            teaching_name: "Analisi I".into(),
            teaching_cod: "AN1".into(),
            teaching_ssd: ssd.into(),
            teaching_credits: Decimal::from(credits),
            teaching_grade: "28".into(),
            teaching_url: String::new(),
            notes: String::new(),
        }
    }

    fn application(home_country: &str) -> Application {
        let now = Utc::now();
        Application {
            id: 1,
            user_id: Uuid::nil(),
            call_id: 1,
            user_country: "IT".into(),
            home_university: "Uni".into(),
            home_country: home_country.into(),
            home_city: "City".into(),
            home_course: "Course".into(),
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
        }
    }

    #[test]
    fn test_ssd_mandatory_for_domestic_home_university() {
        let err = source("", 6).validate(&application("IT")).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "source_teaching_ssd"));

        assert!(source("", 6).validate(&application("DE")).is_ok());
        assert!(source("MAT/05", 6).validate(&application("IT")).is_ok());
    }

    #[test]
    fn test_negative_credits_rejected() {
        let err = source("MAT/05", -1).validate(&application("IT")).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_teaching_url_must_be_http() {
        let mut src = source("MAT/05", 6);
        src.teaching_url = "ftp://example.org/analisi".into();
        let err = src.validate(&application("IT")).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "source_teaching_url"));

        src.teaching_url = "https://example.org/analisi".into();
        assert!(src.validate(&application("IT")).is_ok());
    }

    #[test]
    fn test_same_course_calls_pin_the_source() {
        let now = Utc::now();
        let mut call = Call {
            id: 1,
            title_it: "Bando".into(),
            title_en: "Call".into(),
            is_active: true,
            start: now,
            end: now,
            credits_threshold: Decimal::from(30),
            credits_reference_year: 1,
            payment_required: false,
            payment_url: None,
            protocol_required: false,
            insertions_only_from_same_course: true,
            study_plan_cod: "A".into(),
            course_studyplans: None,
            created_at: now,
        };
        let app = application("IT");

        let pinned = source("MAT/05", 6).pinned_to_home(&app, &call);
        assert_eq!(pinned.university, "Uni");
        assert_eq!(pinned.university_city, "City");
        assert_eq!(pinned.degree_course, "Course");

        call.insertions_only_from_same_course = false;
        let free = source("MAT/05", 6).pinned_to_home(&app, &call);
        assert_eq!(free.university, "Università di Roma");
    }

    #[test]
    fn test_blank_grade_rejected() {
        let mut src = source("MAT/05", 6);
        src.teaching_grade = "  ".into();
        assert!(src.validate(&application("IT")).is_err());
    }
}
