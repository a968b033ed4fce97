//! Database layer for IASP
//!
//! Provides:
//! - SeaORM entity models
//! - Repository implementing the application store
//! - Connection pool management
//! - Schema migrations

pub mod models;
mod repository;

pub use repository::Repository;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use sqlx::migrate::Migrator;
use std::time::Duration;
use tracing::info;

// Path is relative to this crate's manifest
static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Primary connection plus an optional read replica.
///
/// Anything that must observe its own writes (the registration claim) reads
/// from the primary.
#[derive(Clone)]
pub struct DbPool {
    pub primary: DatabaseConnection,
    pub replica: Option<DatabaseConnection>,
}

async fn connect(url: &str, config: &DatabaseConfig, role: &str) -> Result<DatabaseConnection> {
    info!(role, "Connecting to database...");

    let mut options = ConnectOptions::new(url);
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);

    Database::connect(options)
        .await
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("Failed to connect to {}: {}", role, e),
        })
}

impl DbPool {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let primary = connect(&config.url, config, "primary").await?;
        let replica = match config.read_url.as_deref() {
            Some(url) if url != config.url => Some(connect(url, config, "replica").await?),
            _ => None,
        };

        info!(replica = replica.is_some(), "Database connections established");
        Ok(Self { primary, replica })
    }

    /// Replica when configured, otherwise the primary
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Apply pending schema migrations on the primary
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(self.primary.get_postgres_connection_pool())
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Migration failed: {}", e),
            })?;

        info!("Database migrations applied");
        Ok(())
    }

    /// Round trip to every configured connection
    pub async fn ping(&self) -> Result<()> {
        let connections = std::iter::once(("primary", &self.primary))
            .chain(self.replica.as_ref().map(|replica| ("replica", replica)));

        for (role, connection) in connections {
            connection
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("{} ping failed: {}", role, e),
                })?;
        }
        Ok(())
    }
}
