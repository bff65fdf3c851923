pub mod extractors;
pub mod handlers;
pub mod middleware;

use crate::{
    diagnosis::DiagnosisPipeline, image::UploadLimits, models::ModelManager, utils::error::RetinaError,
    validation::RetinaValidator, Config, Result,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DiagnosisPipeline>,
    pub models: Arc<ModelManager>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(models: Arc<ModelManager>) -> Self {
        let config = models.config().clone();
        let validator = RetinaValidator::new(config.validator.clone());
        let pipeline = DiagnosisPipeline::new(
            validator,
            Arc::clone(&models),
            UploadLimits::from(&config.server_config),
        );

        Self {
            pipeline: Arc::new(pipeline),
            models,
            config: Arc::new(config),
        }
    }
}

pub async fn serve(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        RetinaError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e))
    })?;

    tracing::info!("Checkpoint: {}", config.model_path().display());
    tracing::info!("Label reference: {}", config.labels_path().display());

    let models = Arc::new(ModelManager::load(config)?);
    tracing::info!(
        "Classifier ready with {} labels: {:?}",
        models.labels().len(),
        models.labels()
    );

    let app = create_app(AppState::new(models));

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST /predict   - Multipart retina image upload");
    tracing::info!("  GET  /health    - Health check");
    tracing::info!("  GET  /api/info  - Service information");

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        RetinaError::Internal(format!("Failed to bind to address {}: {}", addr, e))
    })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| RetinaError::Internal(format!("Server failed: {}", e)))?;

    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    let server = &state.config.server_config;
    let max_request_size = server.max_request_size;
    let timeout = Duration::from_secs(server.request_timeout);

    Router::new()
        .route("/predict", post(handlers::predict_handler))
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        // axum's own 2MB multipart default is replaced by the configured limit
        .layer(DefaultBodyLimit::max(max_request_size))
        .layer(RequestBodyLimitLayer::new(max_request_size))
        // answers 408 on expiry; a diagnosis already on the blocking pool is
        // not cancelled and finishes in the background
        .layer(TimeoutLayer::new(timeout))
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    state.models.health_check()?;

    Ok(Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })))
}

async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let validator = state.pipeline.validator().config();

    Json(json!({
        "service": "Retina Diagnosis Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "models": state.models.get_stats(),
        "validator": {
            "min_radius": validator.hough.min_radius,
            "max_radius": validator.hough.max_radius,
            "min_color_percentage": validator.min_color_percentage
        },
        "max_request_size": state.config.server_config.max_request_size,
        "max_image_size": [
            state.config.server_config.max_image_width,
            state.config.server_config.max_image_height
        ]
    }))
}
