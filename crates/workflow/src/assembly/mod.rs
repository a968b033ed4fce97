//! Document assembly
//!
//! Produces what the registry receives for an application: the principal
//! document (the rendered application summary) and one merged attachment
//! bundle. Files live under `{media_root}/{pdf_temp}/{application_id}/`:
//!
//! - `application.pdf`: principal document
//! - `to_merge/`: staged inputs of the merge, safe to discard
//! - `attachments/bundle.pdf`: merged bundle, written by rename only
//!
//! An existing bundle is reused as is. Applications are frozen once
//! submitted, so a cached bundle is never stale in practice.

pub mod pdf;

use crate::ledger::LedgerSnapshot;
use crate::Workflow;
use iasp_common::config::StorageConfig;
use iasp_common::db::models::{Application, Call, DocumentSlot, FreeCreditsRule, FreeInsertion, RequiredInsertion, User};
use iasp_common::metrics::record_bundle_assembly;
use iasp_common::store::load_application;
use iasp_common::{AppError, FileStorage, Result};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

pub const PRINCIPAL_TEMPLATE: &str = "application";
pub const REQUIRED_TEMPLATE: &str = "required_insertion";
pub const FREE_TEMPLATE: &str = "free_insertion";

/// Turns a named template and its context into PDF bytes
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> Result<Vec<u8>>;
}

/// Renders a context of the form `{"title": .., "fields": [[label, value], ..]}`
/// as plain text pages
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryPageRenderer;

impl DocumentRenderer for SummaryPageRenderer {
    fn render(&self, template: &str, context: &Value) -> Result<Vec<u8>> {
        let heading = match template {
            PRINCIPAL_TEMPLATE => "Application for enrollment in years after the first",
            REQUIRED_TEMPLATE => "Required insertion",
            FREE_TEMPLATE => "Free credits insertion",
            other => {
                return Err(AppError::Internal {
                    message: format!("unknown template: {}", other),
                })
            }
        };

        let mut lines = vec![heading.to_uppercase()];
        if let Some(title) = context.get("title").and_then(Value::as_str) {
            lines.push(title.to_string());
        }
        lines.push(String::new());

        let fields = context.get("fields").and_then(Value::as_array);
        for field in fields.into_iter().flatten() {
            match field.as_array().map(Vec::as_slice) {
                Some([label, value]) => lines.push(format!(
                    "{}: {}",
                    label.as_str().unwrap_or_default(),
                    value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())
                )),
                Some([section]) => {
                    lines.push(String::new());
                    lines.push(section.as_str().unwrap_or_default().to_uppercase());
                }
                _ => {}
            }
        }

        pdf::text_document(&lines).map_err(|e| AppError::Internal {
            message: format!("rendering {} failed: {}", template, e),
        })
    }
}

/// Relative paths of the generated files of one application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleLayout {
    pub root: String,
    pub principal: String,
    pub merge_folder: String,
    pub bundle: String,
}

impl BundleLayout {
    pub fn new(config: &StorageConfig, application_id: i64) -> Self {
        let root = format!("{}/{}", config.pdf_temp_folder, application_id);
        Self {
            principal: format!("{}/application.pdf", root),
            merge_folder: format!("{}/{}", root, config.merge_folder),
            bundle: format!("{}/{}/bundle.pdf", root, config.bundle_folder),
            root,
        }
    }
}

/// Principal document and bundle, ready to be sent
#[derive(Debug, Clone)]
pub struct AssembledBundle {
    pub principal: String,
    /// Bundle attachments in registry order
    pub attachments: Vec<String>,
    pub reused: bool,
    /// SHA-256 of the bundle, hex encoded
    pub digest: String,
}

/// Build, or reuse, the principal document and the merged bundle
#[instrument(skip(workflow))]
pub async fn assemble_bundle(workflow: &Workflow, application_id: i64) -> Result<AssembledBundle> {
    let started = Instant::now();
    let store = workflow.store.as_ref();
    let storage = &workflow.storage;
    let layout = BundleLayout::new(&workflow.storage_config, application_id);

    let (application, call) = load_application(store, application_id).await?;
    let user = store
        .user(application.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user", application.user_id))?;
    let snapshot = LedgerSnapshot::load(store, application_id).await?;

    if !storage.exists(&layout.principal).await? {
        let context = principal_context(&application, &call, &user, &snapshot);
        let bytes = workflow.renderer.render(PRINCIPAL_TEMPLATE, &context)?;
        storage.save(&layout.principal, &bytes).await?;
        debug!(application_id, "Rendered principal document");
    }

    if storage.exists(&layout.bundle).await? {
        let bytes = storage.read(&layout.bundle).await?;
        let digest = hex::encode(Sha256::digest(&bytes));
        info!(application_id, digest = %digest, "Reusing assembled bundle");
        record_bundle_assembly(started.elapsed().as_secs_f64(), true);
        return Ok(AssembledBundle {
            principal: layout.principal,
            attachments: vec![layout.bundle],
            reused: true,
            digest,
        });
    }

    storage.delete_tree(&layout.merge_folder).await?;
    let parts = stage_parts(workflow, &layout, &application, &call, &user, &snapshot).await?;
    let part_count = parts.len();

    let merged = tokio::task::spawn_blocking(move || pdf::merge(&parts))
        .await
        .map_err(|e| AppError::Internal {
            message: format!("merge task failed: {}", e),
        })?
        .map_err(|e| assembly_failed(application_id, format!("merge failed: {}", e)))?;

    write_atomically(storage, &layout.bundle, &merged).await?;
    storage.delete_tree(&layout.merge_folder).await?;

    let digest = hex::encode(Sha256::digest(&merged));
    info!(
        application_id,
        parts = part_count,
        size = merged.len(),
        digest = %digest,
        "Assembled document bundle"
    );
    record_bundle_assembly(started.elapsed().as_secs_f64(), false);

    Ok(AssembledBundle {
        principal: layout.principal,
        attachments: vec![layout.bundle],
        reused: false,
        digest,
    })
}

/// Drop generated files so the next assembly starts over
pub async fn discard_generated(storage: &FileStorage, config: &StorageConfig, application_id: i64) -> Result<()> {
    storage
        .delete_tree(&BundleLayout::new(config, application_id).root)
        .await
}

/// Collect the merge inputs in bundle order, staging a copy of each one
async fn stage_parts(
    workflow: &Workflow,
    layout: &BundleLayout,
    application: &Application,
    call: &Call,
    user: &User,
    snapshot: &LedgerSnapshot,
) -> Result<Vec<Vec<u8>>> {
    let storage = &workflow.storage;
    let renderer = workflow.renderer.as_ref();
    let application_id = application.id;
    let mut parts = Vec::new();

    for slot in DocumentSlot::ALL {
        if let Some(path) = application.document(slot) {
            let bytes = read_attachment(storage, application_id, path).await?;
            stage(storage, layout, &mut parts, slot.as_str(), bytes).await?;
        }
    }

    for insertion in &snapshot.required {
        let context = required_context(application, call, user, insertion);
        let summary = renderer.render(REQUIRED_TEMPLATE, &context)?;
        stage(storage, layout, &mut parts, &format!("required-{}-a", insertion.id), summary).await?;

        let bytes = read_attachment(storage, application_id, &insertion.source_teaching_attachment).await?;
        stage(storage, layout, &mut parts, &format!("required-{}-b", insertion.id), bytes).await?;
    }

    for (insertion, rule) in &snapshot.free {
        let context = free_context(application, call, user, insertion, rule);
        let summary = renderer.render(FREE_TEMPLATE, &context)?;
        stage(storage, layout, &mut parts, &format!("free-{}-a", insertion.id), summary).await?;

        let bytes = read_attachment(storage, application_id, &insertion.source_teaching_attachment).await?;
        stage(storage, layout, &mut parts, &format!("free-{}-b", insertion.id), bytes).await?;
    }

    Ok(parts)
}

async fn stage(
    storage: &FileStorage,
    layout: &BundleLayout,
    parts: &mut Vec<Vec<u8>>,
    name: &str,
    bytes: Vec<u8>,
) -> Result<()> {
    let path = format!("{}/{:03}-{}.pdf", layout.merge_folder, parts.len() + 1, name);
    storage.save(&path, &bytes).await?;
    parts.push(bytes);
    Ok(())
}

async fn read_attachment(storage: &FileStorage, application_id: i64, path: &str) -> Result<Vec<u8>> {
    storage.read(path).await.map_err(|e| {
        warn!(application_id, path = %path, error = %e, "Attachment missing or unreadable");
        assembly_failed(application_id, format!("attachment {} unavailable", path))
    })
}

/// Write next to the target then rename, so readers never see a partial bundle
async fn write_atomically(storage: &FileStorage, relative: &str, bytes: &[u8]) -> Result<()> {
    let partial = format!("{}.part", relative);
    storage.save(&partial, bytes).await?;

    let from = storage.resolve(&partial)?;
    let to = storage.resolve(relative)?;
    tokio::fs::rename(&from, &to)
        .await
        .map_err(|e| AppError::Storage {
            path: relative.to_string(),
            message: e.to_string(),
        })
}

fn assembly_failed(application_id: i64, message: String) -> AppError {
    AppError::AssemblyFailed {
        application_id,
        message,
    }
}

fn principal_context(application: &Application, call: &Call, user: &User, snapshot: &LedgerSnapshot) -> Value {
    let mut fields = vec![
        json!(["Call", call.title_it]),
        json!(["Applicant", user.full_name()]),
        json!(["Taxpayer id", user.taxpayer_id]),
        json!(["Email", user.email]),
        json!(["Nationality", application.user_country]),
        json!(["Home university", application.home_university]),
        json!(["Home country", application.home_country]),
        json!(["Home city", application.home_city]),
        json!(["Home course", application.home_course]),
        json!([
            "Submission date",
            application
                .submission_date
                .map(|d| d.format("%d/%m/%Y %H:%M").to_string())
                .unwrap_or_default()
        ]),
        json!(["Declared credits", snapshot.total_credits(false).to_string()]),
        json!(["Credits threshold", call.credits_threshold.to_string()]),
    ];

    fields.push(json!(["Required insertions"]));
    for insertion in &snapshot.required {
        fields.push(json!([
            format!("{} {} (year {})", insertion.target_teaching_cod, insertion.target_teaching_name, insertion.target_teaching_year),
            format!("{} - {} cfu", insertion.source_teaching_name, insertion.source_teaching_credits)
        ]));
    }

    fields.push(json!(["Free credits insertions"]));
    for (insertion, rule) in &snapshot.free {
        fields.push(json!([
            format!("Year {}", rule.course_year),
            format!("{} - {} cfu", insertion.source_teaching_name, insertion.source_teaching_credits)
        ]));
    }

    fields.push(json!(["Attachments"]));
    for slot in DocumentSlot::ALL {
        if application.document(slot).is_some() {
            fields.push(json!([slot.as_str(), "attached"]));
        }
    }

    json!({ "title": call.title_it, "fields": fields })
}

/// Source teaching columns shared by both insertion kinds
struct Source<'a> {
    university: &'a str,
    country: &'a str,
    city: &'a str,
    course: &'a str,
    name: &'a str,
    cod: &'a str,
    ssd: &'a str,
    credits: String,
    grade: &'a str,
    url: &'a str,
}

impl Source<'_> {
    fn fields(&self) -> Vec<Value> {
        vec![
            json!(["Source university", self.university]),
            json!(["Source university country", self.country]),
            json!(["Source university city", self.city]),
            json!(["Source degree course", self.course]),
            json!(["Source teaching", self.name]),
            json!(["Source teaching code", self.cod]),
            json!(["Source teaching SSD", self.ssd]),
            json!(["Source teaching credits", self.credits]),
            json!(["Source teaching grade", self.grade]),
            json!(["Source teaching URL", self.url]),
        ]
    }
}

fn required_context(application: &Application, call: &Call, user: &User, insertion: &RequiredInsertion) -> Value {
    let mut fields = vec![
        json!(["Applicant", user.full_name()]),
        json!(["Application", application.id.to_string()]),
        json!(["Target teaching", insertion.target_teaching_name]),
        json!(["Target teaching code", insertion.target_teaching_cod]),
        json!(["Target teaching SSD", insertion.target_teaching_ssd]),
        json!(["Target teaching credits", insertion.target_teaching_credits.to_string()]),
        json!(["Target teaching year", insertion.target_teaching_year.to_string()]),
    ];
    let source = Source {
        university: &insertion.source_university,
        country: &insertion.source_university_country,
        city: &insertion.source_university_city,
        course: &insertion.source_degree_course,
        name: &insertion.source_teaching_name,
        cod: &insertion.source_teaching_cod,
        ssd: &insertion.source_teaching_ssd,
        credits: insertion.source_teaching_credits.to_string(),
        grade: &insertion.source_teaching_grade,
        url: &insertion.source_teaching_url,
    };
    fields.extend(source.fields());
    fields.push(json!(["Notes", insertion.notes]));
    json!({ "title": call.title_it, "fields": fields })
}

fn free_context(
    application: &Application,
    call: &Call,
    user: &User,
    insertion: &FreeInsertion,
    rule: &FreeCreditsRule,
) -> Value {
    let mut fields = vec![
        json!(["Applicant", user.full_name()]),
        json!(["Application", application.id.to_string()]),
        json!(["Course year", rule.course_year.to_string()]),
        json!(["Free credits band", format!("{} - {}", rule.min_value, rule.max_value)]),
    ];
    let source = Source {
        university: &insertion.source_university,
        country: &insertion.source_university_country,
        city: &insertion.source_university_city,
        course: &insertion.source_degree_course,
        name: &insertion.source_teaching_name,
        cod: &insertion.source_teaching_cod,
        ssd: &insertion.source_teaching_ssd,
        credits: insertion.source_teaching_credits.to_string(),
        grade: &insertion.source_teaching_grade,
        url: &insertion.source_teaching_url,
    };
    fields.extend(source.fields());
    fields.push(json!(["Notes", insertion.notes]));
    json!({ "title": call.title_it, "fields": fields })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = BundleLayout::new(&StorageConfig::default(), 42);
        assert_eq!(layout.principal, "pdf_temp/42/application.pdf");
        assert_eq!(layout.merge_folder, "pdf_temp/42/to_merge");
        assert_eq!(layout.bundle, "pdf_temp/42/attachments/bundle.pdf");
    }

    #[test]
    fn test_renderer_accepts_known_templates_only() {
        let context = json!({"title": "Bando", "fields": [["Name", "Mario"], ["Section"], ["Credits", 6]]});
        let bytes = SummaryPageRenderer.render(REQUIRED_TEMPLATE, &context).unwrap();
        assert_eq!(pdf::page_count(&bytes).unwrap(), 1);

        assert!(SummaryPageRenderer.render("unknown", &context).is_err());
    }
}
