//! IASP API Gateway
//!
//! The entry point for applicants and commission members.
//! Handles:
//! - Authentication and authorization
//! - Rate limiting
//! - Request routing to the workflow
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{delete, get, post, put},
    Router,
};
use iasp_common::{
    auth::JwtManager,
    config::{AppConfig, ObservabilityConfig},
    db::{models::DocumentSlot, DbPool, Repository},
    metrics, FileStorage,
};
use iasp_workflow::{notify, HttpRegistryClient, Workflow};
use metrics_exporter_prometheus::PrometheusBuilder;
use middleware::rate_limit::{create_rate_limiter, rate_limit_middleware, CallerRateLimiter};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub workflow: Workflow,
    pub jwt: Arc<JwtManager>,
    /// Absent when the store is not database backed
    pub pool: Option<DbPool>,
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config.observability);

    info!("Starting IASP API Gateway v{}", iasp_common::VERSION);

    metrics::register_metrics();
    if config.observability.metrics_port > 0 {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port)))
            .install()?;
        info!(port = config.observability.metrics_port, "Prometheus exporter listening");
    }

    info!("Connecting to database...");
    let pool = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        pool.migrate().await?;
    }

    let secret = config
        .auth
        .jwt_secret
        .clone()
        .ok_or_else(|| anyhow::anyhow!("auth.jwt_secret is not configured"))?;
    let jwt = Arc::new(JwtManager::new(&secret, config.auth.jwt_expiration_secs));

    let store = Arc::new(Repository::new(pool.clone()));
    let registry = Arc::new(HttpRegistryClient::from_config(
        &config.registry,
        FileStorage::new(config.storage.media_root.clone()),
    )?);
    let notifier = notify::from_config(&config.notification)?;
    let workflow = Workflow::new(
        store,
        registry,
        notifier,
        config.storage.clone(),
        config.registry.clone(),
    );

    let state = AppState {
        workflow,
        jwt,
        pool: Some(pool),
    };

    let limiter = config
        .rate_limit
        .enabled
        .then(|| create_rate_limiter(config.rate_limit.requests_per_second, config.rate_limit.burst));
    let app = create_router(state, limiter);

    let host: IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(host, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
fn create_router(state: AppState, limiter: Option<Arc<CallerRateLimiter>>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Room for one attachment plus the multipart envelope
    let body_limit = state.workflow.storage_config.max_upload_bytes as usize + 64 * 1024;
    let documents_limit = body_limit * DocumentSlot::ALL.len();

    let mut api_routes = Router::new()
        // Applicant endpoints
        .route(
            "/calls/{call}/applications",
            post(handlers::applications::create_application).layer(DefaultBodyLimit::max(documents_limit)),
        )
        .route(
            "/applications/{id}",
            get(handlers::applications::get_application)
                .patch(handlers::applications::update_application)
                .delete(handlers::applications::delete_application),
        )
        .route("/applications/{id}/credits", get(handlers::applications::credits))
        .route("/applications/{id}/submit", post(handlers::applications::submit))
        .route(
            "/applications/{id}/documents/{slot}",
            put(handlers::applications::upload_document).get(handlers::applications::download_document),
        )
        .route("/applications/{id}/insertions", get(handlers::insertions::list))
        .route("/applications/{id}/required", post(handlers::insertions::create_required))
        .route(
            "/applications/{id}/required/{insertion}",
            put(handlers::insertions::update_required).delete(handlers::insertions::delete_required),
        )
        // Same segment: a course year on POST, an insertion id on PUT and DELETE
        .route(
            "/applications/{id}/free/{key}",
            post(handlers::insertions::create_free)
                .put(handlers::insertions::update_free)
                .delete(handlers::insertions::delete_free),
        )
        .route(
            "/applications/{id}/insertions/{kind}/{insertion}/attachment",
            get(handlers::insertions::download_attachment),
        )

        // Commission endpoints
        .route("/commissions/{call}/applications", get(handlers::commissions::list_applications))
        .route(
            "/commissions/{call}/applications/{id}",
            get(handlers::commissions::application_detail),
        )
        .route(
            "/commissions/{call}/applications/{id}/documents/{slot}",
            get(handlers::commissions::download_document),
        )
        .route(
            "/commissions/{call}/applications/{id}/insertions/{kind}/{insertion}/attachment",
            get(handlers::commissions::download_attachment),
        )
        .route(
            "/commissions/{call}/insertions/{kind}/{insertion}/review",
            put(handlers::commissions::upsert_review).delete(handlers::commissions::delete_review),
        )
        .route(
            "/commissions/{call}/insertions/{kind}/{insertion}/logs",
            get(handlers::commissions::review_logs),
        )
        .layer(DefaultBodyLimit::max(body_limit));

    if let Some(limiter) = limiter {
        api_routes = api_routes.layer(axum::middleware::from_fn(
            move |request: axum::extract::Request, next: axum::middleware::Next| {
                rate_limit_middleware(request, next, limiter.clone())
            },
        ));
    }

    // Compose the app
    Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(axum::middleware::from_fn(middleware::metrics::track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests;
