//! Configuration management for IASP services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values
//!
//! The configuration is loaded once at process start and passed explicitly
//! into the workflow services.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// File storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Registry (protocol) configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Registration catch-up job configuration
    #[serde(default)]
    pub registration: RegistrationConfig,

    /// Outgoing e-mail configuration
    #[serde(default)]
    pub notification: NotificationConfig,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Run pending migrations on startup
    #[serde(default)]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root folder for uploaded and generated files
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,

    /// Folder (under the media root) for generated PDFs
    #[serde(default = "default_pdf_temp_folder")]
    pub pdf_temp_folder: String,

    /// Sub folder holding the documents waiting to be merged
    #[serde(default = "default_merge_folder")]
    pub merge_folder: String,

    /// Sub folder holding the merged bundle
    #[serde(default = "default_bundle_folder")]
    pub bundle_folder: String,

    /// Maximum size of an uploaded attachment, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

/// Registry operating mode
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryMode {
    #[default]
    Sandbox,
    Production,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Sandbox or production
    #[serde(default)]
    pub mode: RegistryMode,

    /// Production endpoint
    pub production_url: Option<String>,

    /// Sandbox endpoint and credentials
    pub sandbox_url: Option<String>,
    #[serde(default)]
    pub sandbox_username: String,
    #[serde(default)]
    pub sandbox_password: String,
    #[serde(default = "default_sandbox_aoo")]
    pub sandbox_aoo: String,
    #[serde(default = "default_sandbox_agd")]
    pub sandbox_agd: String,
    #[serde(default = "default_sandbox_uo")]
    pub sandbox_uo: String,
    #[serde(default = "default_sandbox_uo_rpa")]
    pub sandbox_uo_rpa: String,
    #[serde(default)]
    pub sandbox_uo_rpa_username: String,
    #[serde(default)]
    pub sandbox_uo_rpa_matricola: String,
    #[serde(default = "default_sandbox_cod_titolario")]
    pub sandbox_cod_titolario: String,
    #[serde(default)]
    pub sandbox_folder_number: Option<String>,

    /// Bound on each registry call, in seconds
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,

    /// Recipient e-mail when the call configuration has none
    #[serde(default = "default_registry_email")]
    pub default_email: String,

    /// Organisational unit code -> name
    #[serde(default)]
    pub uo_dict: HashMap<String, String>,

    /// File the registered document into the configured folder
    #[serde(default)]
    pub separate_folder_filing: bool,

    /// Author written on every registration
    #[serde(default = "default_registry_author")]
    pub author: String,

    /// Document type declared on every registration
    #[serde(default = "default_registry_doc_type")]
    pub document_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistrationConfig {
    /// Pause between two registrations of the catch-up job, in seconds
    #[serde(default = "default_registration_pause")]
    pub pause_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    /// HTTP mail relay endpoint; log-only when absent
    pub relay_url: Option<String>,

    /// Sender address
    #[serde(default = "default_sender")]
    pub from: String,

    /// Relay request timeout in seconds
    #[serde(default = "default_notification_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// JWT secret for token validation
    pub jwt_secret: Option<String>,

    /// JWT expiration in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_secs: u64,

    /// Request ID header name
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (per user)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 60 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_media_root() -> PathBuf { PathBuf::from("media") }
fn default_pdf_temp_folder() -> String { "pdf_temp".to_string() }
fn default_merge_folder() -> String { "to_merge".to_string() }
fn default_bundle_folder() -> String { "attachments".to_string() }
fn default_max_upload_bytes() -> u64 { 2 * 1024 * 1024 }
fn default_sandbox_aoo() -> String { "AOO55".to_string() }
fn default_sandbox_agd() -> String { "AGD_SANDBOX".to_string() }
fn default_sandbox_uo() -> String { "UO_SANDBOX".to_string() }
fn default_sandbox_uo_rpa() -> String { "UO_SANDBOX".to_string() }
fn default_sandbox_cod_titolario() -> String { "9.1".to_string() }
fn default_registry_timeout() -> u64 { 30 }
fn default_registry_email() -> String { "protocollo@example.org".to_string() }
fn default_registry_author() -> String { "IASP".to_string() }
fn default_registry_doc_type() -> String { "arrivo".to_string() }
fn default_registration_pause() -> u64 { 5 }
fn default_sender() -> String { "noreply@example.org".to_string() }
fn default_notification_timeout() -> u64 { 10 }
fn default_jwt_expiration() -> u64 { 3600 }
fn default_request_id_header() -> String { "X-Request-ID".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "iasp".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            pdf_temp_folder: default_pdf_temp_folder(),
            merge_folder: default_merge_folder(),
            bundle_folder: default_bundle_folder(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            mode: RegistryMode::default(),
            production_url: None,
            sandbox_url: None,
            sandbox_username: String::new(),
            sandbox_password: String::new(),
            sandbox_aoo: default_sandbox_aoo(),
            sandbox_agd: default_sandbox_agd(),
            sandbox_uo: default_sandbox_uo(),
            sandbox_uo_rpa: default_sandbox_uo_rpa(),
            sandbox_uo_rpa_username: String::new(),
            sandbox_uo_rpa_matricola: String::new(),
            sandbox_cod_titolario: default_sandbox_cod_titolario(),
            sandbox_folder_number: None,
            timeout_secs: default_registry_timeout(),
            default_email: default_registry_email(),
            uo_dict: HashMap::new(),
            separate_folder_filing: false,
            author: default_registry_author(),
            document_type: default_registry_doc_type(),
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            pause_secs: default_registration_pause(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            from: default_sender(),
            timeout_secs: default_notification_timeout(),
        }
    }
}

impl RegistryConfig {
    /// Bound on a single registry call
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Endpoint for the active mode
    pub fn endpoint(&self) -> Option<&str> {
        match self.mode {
            RegistryMode::Sandbox => self.sandbox_url.as_deref(),
            RegistryMode::Production => self.production_url.as_deref(),
        }
    }
}

impl RegistrationConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__REGISTRY__MODE=production
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/iasp".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                run_migrations: false,
            },
            storage: StorageConfig::default(),
            registry: RegistryConfig::default(),
            registration: RegistrationConfig::default(),
            notification: NotificationConfig::default(),
            auth: AuthConfig {
                jwt_secret: None,
                jwt_expiration_secs: default_jwt_expiration(),
                request_id_header: default_request_id_header(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
            rate_limit: RateLimitConfig {
                requests_per_second: default_rate_limit(),
                burst: default_burst(),
                enabled: default_enabled(),
            },
        }
    }
}
