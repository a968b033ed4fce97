//! External document registry (protocol) integration
//!
//! [`build_request`] resolves credentials and organisational codes for the
//! configured mode; a [`RegistryClient`] performs the registration and the
//! optional folder filing.

mod http;

pub use http::HttpRegistryClient;

use async_trait::async_trait;
use iasp_common::config::{RegistryConfig, RegistryMode};
use iasp_common::db::models::{Call, User};
use iasp_common::{AppError, ApplicationStore, Result};
use serde::Serialize;
use std::fmt;

/// Person registering the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sender {
    pub first_name: String,
    pub last_name: String,
    pub taxpayer_id: String,
    pub email: String,
}

/// Document attached to a registration, as a path under the media root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryDocument {
    pub name: String,
    pub path: String,
}

impl RegistryDocument {
    pub fn from_path(path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Self {
            name,
            path: path.to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Folder the registered document is filed into
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderTarget {
    pub number: String,
    pub year: Option<i32>,
}

/// Everything needed for one incoming-document registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub credentials: Credentials,
    pub subject: String,
    pub author: String,
    pub document_type: String,
    pub aoo: String,
    pub agd: String,
    pub uo: String,
    pub uo_name: String,
    pub uo_rpa: String,
    pub uo_rpa_username: String,
    pub uo_rpa_matricola: String,
    pub send_email: bool,
    pub recipient_email: String,
    pub cod_titolario: String,
    pub sender: Sender,
    pub principal: RegistryDocument,
    pub attachments: Vec<RegistryDocument>,
    pub folder: Option<FolderTarget>,
}

impl RegistrationRequest {
    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryReceipt {
    pub number: String,
}

/// Registry transport
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Register the principal document with its attachments
    async fn register(&self, request: &RegistrationRequest) -> Result<RegistryReceipt>;

    /// File an already registered document into `folder`
    async fn file_into_folder(
        &self,
        request: &RegistrationRequest,
        folder: &FolderTarget,
        number: &str,
    ) -> Result<()>;
}

/// Resolve the request for an application in the configured mode.
///
/// Production mode needs the active registry configuration of the call;
/// without it this is a configuration error, not a registry error.
pub async fn build_request<S: ApplicationStore + ?Sized>(
    store: &S,
    config: &RegistryConfig,
    call: &Call,
    user: &User,
    principal: &str,
    attachments: &[String],
) -> Result<RegistrationRequest> {
    let sender = Sender {
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        taxpayer_id: user.taxpayer_id.clone(),
        email: user.email.clone(),
    };
    let subject = call.title_it.to_uppercase();
    let principal = RegistryDocument::from_path(principal);
    let attachments: Vec<RegistryDocument> = attachments
        .iter()
        .map(|path| RegistryDocument::from_path(path))
        .collect();

    let request = match config.mode {
        RegistryMode::Sandbox => RegistrationRequest {
            credentials: Credentials {
                username: config.sandbox_username.clone(),
                password: config.sandbox_password.clone(),
            },
            subject,
            author: config.author.clone(),
            document_type: config.document_type.clone(),
            aoo: config.sandbox_aoo.clone(),
            agd: config.sandbox_agd.clone(),
            uo_name: uo_name(config, &config.sandbox_uo)?,
            uo: config.sandbox_uo.clone(),
            uo_rpa: config.sandbox_uo_rpa.clone(),
            uo_rpa_username: config.sandbox_uo_rpa_username.clone(),
            uo_rpa_matricola: config.sandbox_uo_rpa_matricola.clone(),
            send_email: false,
            recipient_email: config.default_email.clone(),
            cod_titolario: config.sandbox_cod_titolario.clone(),
            sender,
            principal,
            attachments,
            folder: config
                .sandbox_folder_number
                .clone()
                .filter(|number| !number.is_empty())
                .map(|number| FolderTarget { number, year: None }),
        },
        RegistryMode::Production => {
            let (call_config, global) = store
                .active_call_registry_configuration(call.id)
                .await?
                .ok_or_else(|| AppError::Configuration {
                    message: format!("No active registry configuration for call {}", call.id),
                })?;

            RegistrationRequest {
                credentials: Credentials {
                    username: global.username,
                    password: global.password,
                },
                subject,
                author: config.author.clone(),
                document_type: config.document_type.clone(),
                aoo: global.aoo,
                agd: global.agd,
                uo_name: uo_name(config, &call_config.uo)?,
                uo: call_config.uo,
                uo_rpa: call_config.uo_rpa,
                uo_rpa_username: call_config.uo_rpa_username,
                uo_rpa_matricola: call_config.uo_rpa_matricola,
                send_email: call_config.send_email,
                recipient_email: call_config
                    .email
                    .filter(|email| !email.is_empty())
                    .unwrap_or_else(|| config.default_email.clone()),
                cod_titolario: call_config.cod_titolario,
                sender,
                principal,
                attachments,
                folder: Some(call_config.folder_number)
                    .filter(|number| !number.is_empty())
                    .map(|number| FolderTarget {
                        number,
                        year: call_config.folder_year,
                    }),
            }
        }
    };

    Ok(request)
}

fn uo_name(config: &RegistryConfig, uo: &str) -> Result<String> {
    config
        .uo_dict
        .get(uo)
        .cloned()
        .ok_or_else(|| AppError::Configuration {
            message: format!("Organisational unit {} is not in the registry dictionary", uo),
        })
}

/// Run the optional folder filing; the message reports the outcome either way
pub async fn file_registered_document(
    client: &dyn RegistryClient,
    config: &RegistryConfig,
    request: &RegistrationRequest,
    number: &str,
) -> Option<String> {
    if !config.separate_folder_filing {
        return None;
    }
    let folder = request.folder.as_ref()?;

    let message = match client.file_into_folder(request, folder, number).await {
        Ok(()) => format!("Collation completed: {} in {}", folder.number, number),
        Err(e) => {
            tracing::warn!(folder = %folder.number, number = %number, error = %e, "Folder filing failed");
            format!("Collation failed: {} in {}: {}", folder.number, number, e)
        }
    };
    tracing::info!("{}", message);
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use iasp_common::db::models::{CallRegistryConfiguration, RegistryConfiguration};
    use iasp_common::InMemoryStore;
    use rust_decimal::Decimal;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn call() -> Call {
        let now = Utc::now();
        Call {
            id: 7,
            title_it: "Iscrizione ad anni successivi".into(),
            title_en: "Enrollment".into(),
            is_active: true,
            start: now - Duration::days(1),
            end: now + Duration::days(1),
            credits_threshold: Decimal::from(30),
            credits_reference_year: 1,
            payment_required: false,
            payment_url: None,
            protocol_required: true,
            insertions_only_from_same_course: false,
            study_plan_cod: "A".into(),
            course_studyplans: None,
            created_at: now,
        }
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            first_name: "Maria".into(),
            last_name: "Rossi".into(),
            taxpayer_id: "RSSMRA80A41H501U".into(),
            email: "maria@example.org".into(),
            created_at: Utc::now(),
        }
    }

    fn config(mode: RegistryMode) -> RegistryConfig {
        let mut config = RegistryConfig {
            mode,
            ..RegistryConfig::default()
        };
        config.uo_dict.insert(config.sandbox_uo.clone(), "Sandbox office".into());
        config.uo_dict.insert("UO42".into(), "Student office".into());
        config
    }

    fn production_rows(email: Option<&str>, folder: &str) -> (RegistryConfiguration, CallRegistryConfiguration) {
        (
            RegistryConfiguration {
                id: 1,
                name: "main".into(),
                username: "ws-user".into(),
                password: "secret".into(),
                aoo: "AOO1".into(),
                agd: "AGD1".into(),
                is_active: true,
            },
            CallRegistryConfiguration {
                id: 1,
                call_id: 7,
                configuration_id: 1,
                name: "call 7".into(),
                uo: "UO42".into(),
                uo_rpa: "RPA".into(),
                uo_rpa_username: "rpa.user".into(),
                uo_rpa_matricola: "12345".into(),
                send_email: true,
                email: email.map(String::from),
                cod_titolario: "5.1".into(),
                folder_number: folder.into(),
                folder_year: Some(2024),
                is_active: true,
                created_at: Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn test_sandbox_request() {
        let store = InMemoryStore::new();
        let request = build_request(
            &store,
            &config(RegistryMode::Sandbox),
            &call(),
            &user(),
            "pdf_temp/1/application.pdf",
            &["pdf_temp/1/attachments/bundle.pdf".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(request.subject, "ISCRIZIONE AD ANNI SUCCESSIVI");
        assert_eq!(request.uo_name, "Sandbox office");
        assert_eq!(request.principal.name, "application.pdf");
        assert_eq!(request.attachment_count(), 1);
        assert_eq!(request.sender.taxpayer_id, "RSSMRA80A41H501U");
        assert!(request.folder.is_none());
    }

    #[tokio::test]
    async fn test_production_without_configuration_is_fatal() {
        let store = InMemoryStore::new();
        let err = build_request(&store, &config(RegistryMode::Production), &call(), &user(), "p.pdf", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_production_uses_call_configuration() {
        let store = InMemoryStore::new();
        let (global, call_config) = production_rows(None, "2024-III/13.7");
        store.add_registry_configuration(global, call_config).unwrap();

        let request = build_request(&store, &config(RegistryMode::Production), &call(), &user(), "p.pdf", &[])
            .await
            .unwrap();

        assert_eq!(request.credentials.username, "ws-user");
        assert_eq!(request.aoo, "AOO1");
        assert_eq!(request.uo_name, "Student office");
        assert!(request.send_email);
        // No call e-mail: falls back to the configured default
        assert_eq!(request.recipient_email, RegistryConfig::default().default_email);
        assert_eq!(
            request.folder,
            Some(FolderTarget {
                number: "2024-III/13.7".into(),
                year: Some(2024)
            })
        );
        assert!(!format!("{:?}", request.credentials).contains("secret"));
    }

    #[tokio::test]
    async fn test_unknown_uo_is_configuration_error() {
        let store = InMemoryStore::new();
        let mut config = config(RegistryMode::Sandbox);
        config.uo_dict.clear();
        let err = build_request(&store, &config, &call(), &user(), "p.pdf", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    struct FilingClient {
        fail: bool,
        filed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RegistryClient for FilingClient {
        async fn register(&self, _request: &RegistrationRequest) -> Result<RegistryReceipt> {
            Ok(RegistryReceipt { number: "1".into() })
        }

        async fn file_into_folder(
            &self,
            _request: &RegistrationRequest,
            folder: &FolderTarget,
            number: &str,
        ) -> Result<()> {
            if self.fail {
                return Err(AppError::Registry {
                    message: "folder closed".into(),
                });
            }
            self.filed.lock().unwrap().push(format!("{}:{}", folder.number, number));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_folder_filing_messages() {
        let store = InMemoryStore::new();
        let (global, call_config) = production_rows(Some("office@example.org"), "F-1");
        store.add_registry_configuration(global, call_config).unwrap();
        let mut config = config(RegistryMode::Production);
        let request = build_request(&store, &config, &call(), &user(), "p.pdf", &[])
            .await
            .unwrap();
        assert_eq!(request.recipient_email, "office@example.org");

        let ok = FilingClient { fail: false, filed: Mutex::new(Vec::new()) };
        let failing = FilingClient { fail: true, filed: Mutex::new(Vec::new()) };

        // Disabled: nothing happens
        assert_eq!(file_registered_document(&ok, &config, &request, "77").await, None);

        config.separate_folder_filing = true;
        assert_eq!(
            file_registered_document(&ok, &config, &request, "77").await.unwrap(),
            "Collation completed: F-1 in 77"
        );
        assert_eq!(ok.filed.lock().unwrap().as_slice(), ["F-1:77"]);

        let message = file_registered_document(&failing, &config, &request, "77").await.unwrap();
        assert!(message.starts_with("Collation failed: F-1 in 77"));
    }
}
