#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use iasp_common::config::{RegistryConfig, StorageConfig};
use iasp_common::db::models::{
    Application, Call, Commission, CommissionMember, DocumentSlot, FreeCreditsRule, User,
};
use iasp_common::{AppError, InMemoryStore, Result};
use iasp_workflow::assembly::pdf;
use iasp_workflow::documents::{replace_document, Upload};
use iasp_workflow::insertion::SourceTeaching;
use iasp_workflow::registry::{FolderTarget, RegistrationRequest, RegistryReceipt};
use iasp_workflow::{DocumentRenderer, LogNotifier, RegistryClient, SummaryPageRenderer, Workflow};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use uuid::Uuid;

pub const CALL_ID: i64 = 1;
pub const APPLICATION_ID: i64 = 10;
pub const FREE_RULE_ID: i64 = 50;

/// Target teachings of the test degree plan
pub const TARGET_ANALYSIS: i64 = 101; // 20 credits, year 1
pub const TARGET_PHYSICS: i64 = 102; // 12 credits, year 1
pub const TARGET_ALGEBRA: i64 = 201; // 9 credits, year 2

/// Registry double counting attempts
#[derive(Default)]
pub struct FakeRegistry {
    pub attempts: AtomicUsize,
    pub fail: AtomicBool,
    pub delay_ms: AtomicUsize,
    pub subjects: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn register(&self, request: &RegistrationRequest) -> Result<RegistryReceipt> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Registry {
                message: "service unavailable".to_string(),
            });
        }
        if let Ok(mut subjects) = self.subjects.lock() {
            subjects.push(request.subject.clone());
        }
        Ok(RegistryReceipt {
            number: format!("{}", 4000 + attempt),
        })
    }

    async fn file_into_folder(
        &self,
        _request: &RegistrationRequest,
        _folder: &FolderTarget,
        _number: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// Summary renderer that keeps every template and context it renders
#[derive(Default)]
pub struct RecordingRenderer {
    pub rendered: Mutex<Vec<(String, Value)>>,
}

impl RecordingRenderer {
    pub fn rendered(&self) -> Vec<(String, Value)> {
        self.rendered.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl DocumentRenderer for RecordingRenderer {
    fn render(&self, template: &str, context: &Value) -> Result<Vec<u8>> {
        if let Ok(mut rendered) = self.rendered.lock() {
            rendered.push((template.to_string(), context.clone()));
        }
        SummaryPageRenderer.render(template, context)
    }
}

/// Value of a `[label, value]` row of a summary context
pub fn context_field<'a>(context: &'a Value, label: &str) -> Option<&'a str> {
    context["fields"]
        .as_array()?
        .iter()
        .find(|row| row[0] == label)?
        .get(1)?
        .as_str()
}

pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<FakeRegistry>,
    pub notifier: Arc<LogNotifier>,
    pub workflow: Workflow,
    pub applicant: User,
    pub reviewer: Uuid,
}

pub fn study_plans() -> serde_json::Value {
    json!([{
        "PlanTabs": [{
            "PlanTabCod": "A",
            "AfRequired": [
                {
                    "Year": 1,
                    "Required": [
                        {"AfId": TARGET_ANALYSIS, "AfCod": "T101", "AfDescription": "Mathematical Analysis", "CreditValue": 20, "SettCod": "MAT/05"},
                        {"AfId": TARGET_PHYSICS, "AfCod": "T102", "AfDescription": "Physics", "CreditValue": 12, "SettCod": "FIS/01"}
                    ]
                },
                {
                    "Year": 2,
                    "Required": [
                        {"AfId": TARGET_ALGEBRA, "AfCod": "T201", "AfDescription": "Linear Algebra", "CreditValue": 9, "SettCod": "MAT/03"}
                    ]
                }
            ]
        }]
    }])
}

pub fn call() -> Call {
    let now = Utc::now();
    Call {
        id: CALL_ID,
        title_it: "Iscrizione ad anni successivi al primo".into(),
        title_en: "Enrollment in years after the first".into(),
        is_active: true,
        start: now - Duration::days(1),
        end: now + Duration::days(10),
        credits_threshold: Decimal::from(30),
        credits_reference_year: 1,
        payment_required: false,
        payment_url: None,
        protocol_required: false,
        insertions_only_from_same_course: false,
        study_plan_cod: "A".into(),
        course_studyplans: Some(study_plans()),
        created_at: now,
    }
}

pub fn application(id: i64, user_id: Uuid) -> Application {
    let now = Utc::now();
    Application {
        id,
        user_id,
        call_id: CALL_ID,
        user_country: "IT".into(),
        home_university: "Università della Calabria".into(),
        home_country: "IT".into(),
        home_city: "Rende".into(),
        home_course: "Informatica".into(),
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

pub fn source(cod: &str, credits: i64) -> SourceTeaching {
    SourceTeaching {
        university: "Università della Calabria".into(),
        university_country: "IT".into(),
        university_city: "Rende".into(),
        degree_course: "Informatica".into(),
        teaching_name: format!("Teaching {}", cod),
        teaching_cod: cod.into(),
        teaching_ssd: "MAT/05".into(),
        teaching_credits: Decimal::from(credits),
        teaching_grade: "27".into(),
        teaching_url: String::new(),
        notes: String::new(),
    }
}

/// Single-page PDF upload
pub fn pdf_upload(name: &str) -> Upload {
    let bytes = pdf::text_document(&[format!("Attachment {}", name)]).expect("pdf");
    Upload::new(format!("{}.pdf", name), bytes)
}

impl Fixture {
    /// Store seeded with one call, its free credits rule, one applicant and
    /// one open application; `adjust` tweaks the call first
    pub fn new(adjust: impl FnOnce(&mut Call)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();

        let applicant = User {
            id: Uuid::new_v4(),
            first_name: "Maria".into(),
            last_name: "Rossi".into(),
            taxpayer_id: "RSSMRA90A41D086X".into(),
            email: "maria.rossi@example.org".into(),
            created_at: now,
        };
        let reviewer = Uuid::new_v4();

        let mut call = call();
        adjust(&mut call);
        store.add_call(call).unwrap();
        store.add_user(applicant.clone()).unwrap();
        store
            .add_application(application(APPLICATION_ID, applicant.id))
            .unwrap();
        store
            .add_free_credits_rule(FreeCreditsRule {
                id: FREE_RULE_ID,
                call_id: CALL_ID,
                course_year: 1,
                min_value: Decimal::ZERO,
                max_value: Decimal::from(15),
                is_active: true,
            })
            .unwrap();
        store
            .add_commission(
                Commission {
                    id: 1,
                    call_id: CALL_ID,
                    name: "Computer Science".into(),
                    start: now - Duration::days(1),
                    end: now + Duration::days(30),
                    is_active: true,
                },
                vec![CommissionMember {
                    id: 1,
                    commission_id: 1,
                    user_id: reviewer,
                    role: "member".into(),
                    is_active: true,
                }],
            )
            .unwrap();

        let registry = Arc::new(FakeRegistry::default());
        let notifier = Arc::new(LogNotifier::new());

        let storage_config = StorageConfig {
            media_root: dir.path().to_path_buf(),
            ..StorageConfig::default()
        };
        let mut registry_config = RegistryConfig::default();
        registry_config
            .uo_dict
            .insert(registry_config.sandbox_uo.clone(), "Student Office".into());

        let workflow = Workflow::new(
            store.clone(),
            registry.clone(),
            notifier.clone(),
            storage_config,
            registry_config,
        );

        Self {
            dir,
            store,
            registry,
            notifier,
            workflow,
            applicant,
            reviewer,
        }
    }

    /// Register a fresh user without any application
    pub fn add_user(&self, tag: i64) -> User {
        let user = User {
            id: Uuid::new_v4(),
            first_name: "Luca".into(),
            last_name: "Bianchi".into(),
            taxpayer_id: format!("BNCLCU{}", tag),
            email: format!("applicant{}@example.org", tag),
            created_at: Utc::now(),
        };
        self.store.add_user(user.clone()).unwrap();
        user
    }

    /// Add a second application of a fresh applicant
    pub fn add_applicant(&self, application_id: i64, adjust: impl FnOnce(&mut Application)) -> User {
        let user = self.add_user(application_id);
        let mut app = application(application_id, user.id);
        adjust(&mut app);
        self.store.add_application(app).unwrap();
        user
    }

    /// Upload the two documents every applicant needs
    pub async fn attach_mandatory_documents(&self, application_id: i64) {
        for (slot, name) in [
            (DocumentSlot::ExamsCertification, "exams"),
            (DocumentSlot::TeachingPlan, "plan"),
        ] {
            replace_document(&self.workflow, application_id, slot, pdf_upload(name))
                .await
                .unwrap();
        }
    }
}
