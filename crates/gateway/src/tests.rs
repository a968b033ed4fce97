use super::*;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use chrono::{Duration, Utc};
use iasp_common::config::{RegistryConfig, StorageConfig};
use iasp_common::db::models::{Application, Call, Commission, CommissionMember, User};
use iasp_common::{AppError, InMemoryStore};
use iasp_workflow::assembly::pdf;
use iasp_workflow::registry::{FolderTarget, RegistrationRequest, RegistryReceipt};
use iasp_workflow::{LogNotifier, RegistryClient};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

/// Registry that is never reachable
struct NoRegistry;

#[async_trait]
impl RegistryClient for NoRegistry {
    async fn register(&self, _request: &RegistrationRequest) -> iasp_common::Result<RegistryReceipt> {
        Err(AppError::Registry {
            message: "offline".to_string(),
        })
    }

    async fn file_into_folder(
        &self,
        _request: &RegistrationRequest,
        _folder: &FolderTarget,
        _number: &str,
    ) -> iasp_common::Result<()> {
        Ok(())
    }
}

const SECRET: &str = "test-secret";
const APPLICATION_ID: i64 = 7;
const SUBMITTED_ID: i64 = 8;
const CALL_ID: i64 = 3;
const SEEDED_EXAMS: &str = "seed/exams.pdf";

struct TestApp {
    _dir: tempfile::TempDir,
    router: Router,
    jwt: Arc<JwtManager>,
    applicant: Uuid,
    reviewer: Uuid,
    newcomer: Uuid,
}

fn user(id: Uuid, first_name: &str, taxpayer_id: &str) -> User {
    User {
        id,
        first_name: first_name.into(),
        last_name: "Verdi".into(),
        taxpayer_id: taxpayer_id.into(),
        email: format!("{}@example.org", first_name.to_lowercase()),
        created_at: Utc::now(),
    }
}

fn application(id: i64, user_id: Uuid) -> Application {
    let now = Utc::now();
    Application {
        id,
        user_id,
        call_id: CALL_ID,
        user_country: "IT".into(),
        home_university: "Uni".into(),
        home_country: "IT".into(),
        home_city: "Bari".into(),
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

fn setup() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let now = Utc::now();
    let applicant = Uuid::new_v4();
    let reviewer = Uuid::new_v4();

    store
        .add_call(Call {
            id: CALL_ID,
            title_it: "Bando".into(),
            title_en: "Call".into(),
            is_active: true,
            start: now - Duration::days(1),
            end: now + Duration::days(1),
            credits_threshold: Decimal::from(30),
            credits_reference_year: 1,
            payment_required: false,
            payment_url: None,
            protocol_required: false,
            insertions_only_from_same_course: false,
            study_plan_cod: "A".into(),
            course_studyplans: Some(json!({
                "PlanTabs": [{
                    "PlanTabCod": "A",
                    "AfRequired": [{
                        "Year": 1,
                        "Required": [{"AfId": 11, "AfCod": "T11", "AfDescription": "Analysis", "CreditValue": 12, "SettCod": "MAT/05"}]
                    }]
                }]
            })),
            created_at: now,
        })
        .unwrap();
    let submitter = Uuid::new_v4();
    let newcomer = Uuid::new_v4();
    store.add_user(user(applicant, "Anna", "VRDNNA")).unwrap();
    store.add_user(user(submitter, "Bruno", "VRDBRN")).unwrap();
    store.add_user(user(newcomer, "Carla", "VRDCRL")).unwrap();
    store.add_application(application(APPLICATION_ID, applicant)).unwrap();

    std::fs::create_dir_all(dir.path().join("seed")).unwrap();
    std::fs::write(
        dir.path().join(SEEDED_EXAMS),
        pdf::text_document(&["Exams".to_string()]).unwrap(),
    )
    .unwrap();
    let mut submitted = application(SUBMITTED_ID, submitter);
    submitted.exams_certification = Some(SEEDED_EXAMS.into());
    submitted.teaching_plan = Some(SEEDED_EXAMS.into());
    submitted.submission_date = Some(now);
    store.add_application(submitted).unwrap();

    store
        .add_commission(
            Commission {
                id: 1,
                call_id: CALL_ID,
                name: "Commission".into(),
                start: now - Duration::days(1),
                end: now + Duration::days(1),
                is_active: true,
            },
            vec![CommissionMember {
                id: 1,
                commission_id: 1,
                user_id: reviewer,
                role: "president".into(),
                is_active: true,
            }],
        )
        .unwrap();

    let storage_config = StorageConfig {
        media_root: dir.path().to_path_buf(),
        ..StorageConfig::default()
    };
    let workflow = Workflow::new(
        store,
        Arc::new(NoRegistry),
        Arc::new(LogNotifier::new()),
        storage_config,
        RegistryConfig::default(),
    );
    let jwt = Arc::new(JwtManager::new(SECRET, 3600));
    let state = AppState {
        workflow,
        jwt: jwt.clone(),
        pool: None,
    };

    TestApp {
        _dir: dir,
        router: create_router(state, Some(create_rate_limiter(1000, 1000))),
        jwt,
        applicant,
        reviewer,
        newcomer,
    }
}

impl TestApp {
    fn bearer(&self, user: Uuid) -> String {
        format!("Bearer {}", self.jwt.generate_token(user).unwrap())
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    /// Status, content type and raw body
    async fn download(&self, uri: &str, user: Uuid) -> (StatusCode, String, Vec<u8>) {
        let response = self
            .router
            .clone()
            .oneshot(get(uri, Some(self.bearer(user))))
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, bytes.to_vec())
    }

    fn upload(
        &self,
        method: &str,
        uri: &str,
        user: Uuid,
        data: Option<&Value>,
        files: &[(&str, &[u8])],
    ) -> Request<Body> {
        let boundary = "iasp-boundary";
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, self.bearer(user))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(multipart(boundary, data, files)))
            .unwrap()
    }
}

fn get(uri: &str, auth: Option<String>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).unwrap()
}

/// `data` holds the JSON form; each file part is named after its key
fn multipart(boundary: &str, data: Option<&Value>, files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(data) = data {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"data\"\r\n\r\n{}\r\n",
                boundary, data
            )
            .as_bytes(),
        );
    }
    for (name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"{n}\"; filename=\"{n}.pdf\"\r\n\
                 Content-Type: application/pdf\r\n\r\n",
                b = boundary,
                n = name
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}

fn descriptors(user_country: &str) -> Value {
    json!({
        "user_country": user_country,
        "home_university": "Università di Bari",
        "home_country": "IT",
        "home_city": "Bari",
        "home_course": "Informatica"
    })
}

#[tokio::test]
async fn test_health() {
    let app = setup();
    let (status, body) = app.send(get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = app.send(get("/ready", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["database"]["status"], "skipped");
    assert_eq!(body["storage"]["status"], "up");
}

#[tokio::test]
async fn test_credits_require_token() {
    let app = setup();
    let uri = format!("/v1/applications/{}/credits", APPLICATION_ID);

    let (status, _) = app.send(get(&uri, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.send(get(&uri, Some("Bearer not-a-token".into()))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_credits_for_owner_only() {
    let app = setup();
    let uri = format!("/v1/applications/{}/credits", APPLICATION_ID);

    let (status, body) = app.send(get(&uri, Some(app.bearer(app.applicant)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["editable"], true);
    assert_eq!(body["submittable"], false);
    assert_eq!(body["missing_document"], "exams_certification");
    assert!(body.get("reviewed_total").is_none());

    let (status, _) = app.send(get(&uri, Some(app.bearer(Uuid::new_v4())))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_reviewed_credits_for_commission_members() {
    let app = setup();
    let uri = format!("/v1/applications/{}/credits?review=true", SUBMITTED_ID);

    let (status, body) = app.send(get(&uri, Some(app.bearer(app.reviewer)))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("reviewed_total").is_some());

    // The applicant is not a commission member
    let (status, _) = app.send(get(&uri, Some(app.bearer(app.applicant)))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Drafts stay hidden from the commission
    let draft = format!("/v1/applications/{}/credits?review=true", APPLICATION_ID);
    let (status, _) = app.send(get(&draft, Some(app.bearer(app.reviewer)))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_submit_checks_documents_then_threshold() {
    let app = setup();
    let submit = || {
        Request::builder()
            .method("POST")
            .uri(format!("/v1/applications/{}/submit", APPLICATION_ID))
            .header(header::AUTHORIZATION, app.bearer(app.applicant))
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = app.send(submit()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["field"], "exams_certification");

    let file = pdf::text_document(&["Document".to_string()]).unwrap();
    for slot in ["exams_certification", "teaching_plan"] {
        let uri = format!("/v1/applications/{}/documents/{}", APPLICATION_ID, slot);
        let request = app.upload("PUT", &uri, app.applicant, None, &[("file", file.as_slice())]);
        let (status, _) = app.send(request).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app.send(submit()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["message"].as_str().unwrap_or_default().contains("threshold"));
}

#[tokio::test]
async fn test_create_application() {
    let app = setup();
    let uri = format!("/v1/calls/{}/applications", CALL_ID);
    let file = pdf::text_document(&["Document".to_string()]).unwrap();
    let data = descriptors("IT");

    let request = app.upload("POST", &uri, app.newcomer, Some(&data), &[("exams_certification", file.as_slice())]);
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["field"], "teaching_plan");

    let files: [(&str, &[u8]); 2] = [("exams_certification", file.as_slice()), ("teaching_plan", file.as_slice())];
    let (status, created) = app.send(app.upload("POST", &uri, app.newcomer, Some(&data), &files)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["home_city"], "Bari");
    assert!(created["submission_date"].is_null());

    // One application per call
    let (status, _) = app.send(app.upload("POST", &uri, app.newcomer, Some(&data), &files)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send(app.upload("POST", "/v1/calls/99/applications", app.newcomer, Some(&data), &files))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let id = created["id"].as_i64().unwrap();
    let own = format!("/v1/applications/{}", id);
    let (status, body) = app.send(get(&own, Some(app.bearer(app.newcomer)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);
    let (status, _) = app.send(get(&own, Some(app.bearer(app.applicant)))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_update_descriptors() {
    let app = setup();
    let uri = format!("/v1/applications/{}", APPLICATION_ID);
    let patch = |data: Value| {
        Request::builder()
            .method("PATCH")
            .uri(uri.as_str())
            .header(header::AUTHORIZATION, app.bearer(app.applicant))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(data.to_string()))
            .unwrap()
    };

    let file = pdf::text_document(&["Document".to_string()]).unwrap();
    for slot in ["exams_certification", "teaching_plan"] {
        let document = format!("/v1/applications/{}/documents/{}", APPLICATION_ID, slot);
        let (status, _) = app
            .send(app.upload("PUT", &document, app.applicant, None, &[("file", file.as_slice())]))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    // A foreign applicant needs a language certification first
    let (status, body) = app.send(patch(descriptors("FR"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["field"], "language_certification");

    let (status, body) = app.send(patch(descriptors("it"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_country"], "IT");
    assert_eq!(body["home_university"], "Università di Bari");
}

#[tokio::test]
async fn test_document_download() {
    let app = setup();
    let file = pdf::text_document(&["Exams".to_string()]).unwrap();
    let document = format!("/v1/applications/{}/documents/exams_certification", APPLICATION_ID);

    let (status, _, _) = app.download(&document, app.applicant).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(app.upload("PUT", &document, app.applicant, None, &[("file", file.as_slice())]))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, content_type, bytes) = app.download(&document, app.applicant).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/pdf");
    assert_eq!(bytes, file);

    let (status, _, _) = app.download(&document, app.newcomer).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_commission_sees_submitted_applications_only() {
    let app = setup();
    let list = format!("/v1/commissions/{}/applications", CALL_ID);

    let (status, body) = app.send(get(&list, Some(app.bearer(app.reviewer)))).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["application_id"], SUBMITTED_ID);
    assert_eq!(rows[0]["applicant"], "Bruno Verdi");

    let (status, _) = app.send(get(&list, Some(app.bearer(app.applicant)))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let detail = |id: i64| format!("/v1/commissions/{}/applications/{}", CALL_ID, id);
    let (status, body) = app.send(get(&detail(SUBMITTED_ID), Some(app.bearer(app.reviewer)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["application"]["id"], SUBMITTED_ID);
    assert_eq!(body["required"].as_array().map(Vec::len), Some(0));

    let (status, _) = app.send(get(&detail(APPLICATION_ID), Some(app.bearer(app.reviewer)))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let document = format!("{}/documents/exams_certification", detail(SUBMITTED_ID));
    let (status, content_type, _) = app.download(&document, app.reviewer).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/pdf");
}

#[tokio::test]
async fn test_create_required_insertion() {
    let app = setup();
    let data = json!({
        "target_teaching_id": 11,
        "university": "Uni",
        "university_country": "IT",
        "degree_course": "Informatica",
        "teaching_name": "Analisi I",
        "teaching_cod": "AN1",
        "teaching_ssd": "MAT/05",
        "teaching_credits": "9",
        "teaching_grade": "28"
    });
    let file = pdf::text_document(&["Exam transcript".to_string()]).unwrap();
    let uri = format!("/v1/applications/{}/required", APPLICATION_ID);
    let request = || app.upload("POST", &uri, app.applicant, Some(&data), &[("file", file.as_slice())]);

    let (status, body) = app.send(request()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["target_teaching_cod"], "T11");

    let (status, _) = app.send(request()).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let uri = format!("/v1/applications/{}/insertions", APPLICATION_ID);
    let (status, body) = app.send(get(&uri, Some(app.bearer(app.applicant)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["required"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["free"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_review_routes_need_membership() {
    let app = setup();
    let uri = format!("/v1/commissions/{}/insertions/required/1/logs", CALL_ID);

    let (status, _) = app.send(get(&uri, Some(app.bearer(app.applicant)))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.send(get(&uri, Some(app.bearer(app.reviewer)))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let bad_kind = format!("/v1/commissions/{}/insertions/other/1/logs", CALL_ID);
    let (status, _) = app.send(get(&bad_kind, Some(app.bearer(app.reviewer)))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
