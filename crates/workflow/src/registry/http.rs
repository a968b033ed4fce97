//! JSON-over-HTTP registry client

use super::{FolderTarget, RegistrationRequest, RegistryClient, RegistryDocument, RegistryReceipt, Sender};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use iasp_common::config::RegistryConfig;
use iasp_common::{AppError, FileStorage, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Registry reachable at `{endpoint}/documents` and `{endpoint}/folders/documents`
pub struct HttpRegistryClient {
    client: reqwest::Client,
    endpoint: String,
    storage: FileStorage,
    timeout: Duration,
}

#[derive(Serialize)]
struct DocumentPayload {
    name: String,
    content: String,
}

#[derive(Serialize)]
struct Recipient<'a> {
    uo: &'a str,
    uo_name: &'a str,
    rpa: &'a str,
    rpa_username: &'a str,
    rpa_code: &'a str,
    email: &'a str,
    send_email: bool,
}

#[derive(Serialize)]
struct RegisterPayload<'a> {
    subject: &'a str,
    author: &'a str,
    document_type: &'a str,
    aoo: &'a str,
    agd: &'a str,
    classification: &'a str,
    sender: &'a Sender,
    recipient: Recipient<'a>,
    attachment_count: usize,
    principal: DocumentPayload,
    attachments: Vec<DocumentPayload>,
}

#[derive(Deserialize)]
struct RegisterResponse {
    #[serde(default)]
    number: String,
}

#[derive(Serialize)]
struct FilingPayload<'a> {
    folder_number: &'a str,
    folder_year: Option<i32>,
    document_number: &'a str,
    minute: bool,
}

impl HttpRegistryClient {
    pub fn new(endpoint: impl Into<String>, storage: FileStorage, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            storage,
            timeout,
        })
    }

    /// Client for the endpoint of the configured mode
    pub fn from_config(config: &RegistryConfig, storage: FileStorage) -> Result<Self> {
        let endpoint = config.endpoint().ok_or_else(|| AppError::Configuration {
            message: format!("No registry endpoint configured for {:?} mode", config.mode),
        })?;
        Self::new(endpoint, storage, config.timeout())
    }

    async fn encode(&self, document: &RegistryDocument) -> Result<DocumentPayload> {
        let bytes = self.storage.read(&document.path).await?;
        Ok(DocumentPayload {
            name: document.name.clone(),
            content: BASE64.encode(bytes),
        })
    }

    /// Bound a registry exchange by the configured timeout
    async fn bounded<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AppError::Registry {
                message: format!("{} timed out after {}s", what, self.timeout.as_secs()),
            })?
    }

    async fn post<B: Serialize>(&self, path: &str, request: &RegistrationRequest, body: &B) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .basic_auth(&request.credentials.username, Some(&request.credentials.password))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Registry {
                message: format!("Registry unreachable: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Registry {
                message: format!("Registry rejected request ({}): {}", status, body),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn register(&self, request: &RegistrationRequest) -> Result<RegistryReceipt> {
        let principal = self.encode(&request.principal).await?;
        let mut attachments = Vec::with_capacity(request.attachments.len());
        for attachment in &request.attachments {
            attachments.push(self.encode(attachment).await?);
        }

        let payload = RegisterPayload {
            subject: &request.subject,
            author: &request.author,
            document_type: &request.document_type,
            aoo: &request.aoo,
            agd: &request.agd,
            classification: &request.cod_titolario,
            sender: &request.sender,
            recipient: Recipient {
                uo: &request.uo,
                uo_name: &request.uo_name,
                rpa: &request.uo_rpa,
                rpa_username: &request.uo_rpa_username,
                rpa_code: &request.uo_rpa_matricola,
                email: &request.recipient_email,
                send_email: request.send_email,
            },
            attachment_count: request.attachment_count(),
            principal,
            attachments,
        };

        info!(subject = %request.subject, attachments = request.attachment_count(), "Registering document");

        let response: RegisterResponse = self
            .bounded("Registration", async {
                let response = self.post("/documents", request, &payload).await?;
                response.json().await.map_err(|e| AppError::Registry {
                    message: format!("Unreadable registry response: {}", e),
                })
            })
            .await?;

        let number = response.number.trim().to_string();
        if number.is_empty() {
            return Err(AppError::Registry {
                message: "Registry response carries no number".to_string(),
            });
        }

        debug!(number = %number, "Registry assigned number");
        Ok(RegistryReceipt { number })
    }

    async fn file_into_folder(
        &self,
        request: &RegistrationRequest,
        folder: &FolderTarget,
        number: &str,
    ) -> Result<()> {
        let payload = FilingPayload {
            folder_number: &folder.number,
            folder_year: folder.year,
            document_number: number,
            minute: false,
        };

        self.bounded("Folder filing", async {
            self.post("/folders/documents", request, &payload).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Credentials;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn storage_with_files() -> (tempfile::TempDir, FileStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.save("pdf_temp/1/application.pdf", b"%PDF principal").await.unwrap();
        storage.save("pdf_temp/1/attachments/bundle.pdf", b"%PDF bundle").await.unwrap();
        (dir, storage)
    }

    fn request() -> RegistrationRequest {
        RegistrationRequest {
            credentials: Credentials {
                username: "ws".into(),
                password: "pw".into(),
            },
            subject: "BANDO".into(),
            author: "IASP".into(),
            document_type: "arrivo".into(),
            aoo: "AOO".into(),
            agd: "AGD".into(),
            uo: "UO".into(),
            uo_name: "Office".into(),
            uo_rpa: "RPA".into(),
            uo_rpa_username: String::new(),
            uo_rpa_matricola: String::new(),
            send_email: false,
            recipient_email: "office@example.org".into(),
            cod_titolario: "9.1".into(),
            sender: Sender {
                first_name: "Maria".into(),
                last_name: "Rossi".into(),
                taxpayer_id: "RSSMRA".into(),
                email: "maria@example.org".into(),
            },
            principal: RegistryDocument::from_path("pdf_temp/1/application.pdf"),
            attachments: vec![RegistryDocument::from_path("pdf_temp/1/attachments/bundle.pdf")],
            folder: None,
        }
    }

    #[tokio::test]
    async fn test_register_returns_number() {
        let server = MockServer::start().await;
        let (_dir, storage) = storage_with_files().await;

        Mock::given(method("POST"))
            .and(path("/documents"))
            .and(header_exists("authorization"))
            .and(body_partial_json(serde_json::json!({
                "subject": "BANDO",
                "attachment_count": 1,
                "principal": {"name": "application.pdf", "content": BASE64.encode(b"%PDF principal")}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"number": "2024/123"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpRegistryClient::new(server.uri(), storage, Duration::from_secs(5)).unwrap();
        let receipt = client.register(&request()).await.unwrap();
        assert_eq!(receipt.number, "2024/123");
    }

    #[tokio::test]
    async fn test_empty_number_is_registry_error() {
        let server = MockServer::start().await;
        let (_dir, storage) = storage_with_files().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"number": ""})))
            .mount(&server)
            .await;

        let client = HttpRegistryClient::new(server.uri(), storage, Duration::from_secs(5)).unwrap();
        let err = client.register(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::Registry { .. }));
    }

    #[tokio::test]
    async fn test_rejection_is_registry_error() {
        let server = MockServer::start().await;
        let (_dir, storage) = storage_with_files().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let client = HttpRegistryClient::new(server.uri(), storage, Duration::from_secs(5)).unwrap();
        let err = client.register(&request()).await.unwrap_err();
        assert!(err.to_string().contains("bad credentials"));
    }

    #[tokio::test]
    async fn test_slow_registry_times_out() {
        let server = MockServer::start().await;
        let (_dir, storage) = storage_with_files().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"number": "1"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = HttpRegistryClient::new(server.uri(), storage, Duration::from_millis(200)).unwrap();
        let err = client.register(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::Registry { .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_folder_filing() {
        let server = MockServer::start().await;
        let (_dir, storage) = storage_with_files().await;
        Mock::given(method("POST"))
            .and(path("/folders/documents"))
            .and(body_partial_json(serde_json::json!({"folder_number": "F-1", "document_number": "77"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpRegistryClient::new(format!("{}/", server.uri()), storage, Duration::from_secs(5)).unwrap();
        let folder = FolderTarget {
            number: "F-1".into(),
            year: Some(2024),
        };
        client.file_into_folder(&request(), &folder, "77").await.unwrap();
    }

    #[test]
    fn test_from_config_needs_endpoint() {
        let config = RegistryConfig::default();
        let result = HttpRegistryClient::from_config(&config, FileStorage::new("media"));
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }
}
