//! IASP Common Library
//!
//! Shared code for the IASP services including:
//! - Database entities, repository and the application store seam
//! - Error types and handling
//! - Configuration management
//! - File storage
//! - Authentication utilities
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod storage;
pub mod store;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::Repository;
pub use errors::{AppError, Result};
pub use storage::FileStorage;
pub use store::{ApplicationStore, InMemoryStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
