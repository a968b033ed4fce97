//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::time::Instant;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub database: Check,
    pub storage: Check,
}

#[derive(Serialize)]
pub struct Check {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Check {
    fn up(latency_ms: Option<u64>) -> Self {
        Self {
            status: "up",
            latency_ms,
            error: None,
        }
    }

    fn down(error: String) -> Self {
        Self {
            status: "down",
            latency_ms: None,
            error: Some(error),
        }
    }
}

/// Liveness check
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: iasp_common::VERSION,
    })
}

/// Readiness check: database round trip and the media root
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let database = match &state.pool {
        None => Check {
            status: "skipped",
            latency_ms: None,
            error: None,
        },
        Some(pool) => {
            let start = Instant::now();
            match pool.ping().await {
                Ok(()) => Check::up(Some(start.elapsed().as_millis() as u64)),
                Err(e) => Check::down(e.to_string()),
            }
        }
    };

    let media_root = &state.workflow.storage_config.media_root;
    let storage = match tokio::fs::metadata(media_root).await {
        Ok(meta) if meta.is_dir() => Check::up(None),
        Ok(_) => Check::down(format!("{} is not a directory", media_root.display())),
        Err(e) => Check::down(format!("{}: {}", media_root.display(), e)),
    };

    let ready = database.status != "down" && storage.status != "down";
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if ready { "ready" } else { "not_ready" },
            database,
            storage,
        }),
    )
}
