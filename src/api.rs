//! HTTP API Server for Recommendations
//!
//! Admin endpoints trigger and list batches; the public endpoint serves the
//! latest batch for a user.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::recommendation::{
    model::{BatchId, RecommendationBatch, Recommendations, UserId},
    Algorithm, BatchOrchestrator, RecommendationReader, RecommendationStore,
};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Shared application state
pub struct AppState {
    pub orchestrator: Arc<BatchOrchestrator>,
    pub reader: RecommendationReader,
    pub store: Arc<dyn RecommendationStore>,
    /// Required value of `x-admin-token` on admin routes; `None` leaves them open
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        orchestrator: Arc<BatchOrchestrator>,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            reader: RecommendationReader::new(Arc::clone(&store)),
            orchestrator,
            store,
            admin_token,
        }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<()> {
        let Some(expected) = self.admin_token.as_deref() else {
            return Ok(());
        };

        match headers.get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
            Some(given) if given == expected => Ok(()),
            Some(_) => Err(Error::Unauthorized {
                message: "invalid admin token".into(),
            }),
            None => Err(Error::Unauthorized {
                message: format!("missing {} header", ADMIN_TOKEN_HEADER).into(),
            }),
        }
    }
}

/// Request body for batch generation
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub algorithm: Option<String>,
    pub top_n: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub ok: bool,
    pub batch_id: BatchId,
    pub algorithm: Algorithm,
    pub users: usize,
    pub items: usize,
}

/// Query params for the batch history endpoint
#[derive(Debug, Deserialize)]
pub struct BatchListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchListResponse {
    pub batches: Vec<RecommendationBatch>,
}

/// Query params for the recommendations endpoint
#[derive(Debug, Deserialize)]
pub struct RecommendationsQuery {
    pub algorithm: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Build the router with tracing, timeout and (optionally) CORS layers
pub fn create_router(state: Arc<AppState>, config: &ApiConfig) -> Router {
    let app = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Admin
        .route(
            "/api/v1/admin/recommendations/generate",
            post(generate_batch),
        )
        .route("/api/v1/admin/recommendations/batches", get(list_batches))
        // Reader
        .route("/api/v1/recommendations/:user_id", get(get_recommendations))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(config.request_timeout)),
        )
        .with_state(state);

    if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app.layer(cors)
    } else {
        app
    }
}

/// Start the API server; in-flight requests finish once `shutdown` resolves
pub async fn start_server<F>(state: Arc<AppState>, config: ApiConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state, &config);

    let addr = format!("{}:{}", config.host, config.port);
    info!("🚀 Starting recommendation API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Health check endpoint; `degraded` when the store does not answer
async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let (status, label) = match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(e) => {
            tracing::warn!(error = %e, "Store ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Trigger a batch run and wait for it to finish.
///
/// The run lives on its own task, so a timed-out or disconnected request still
/// leaves a committed or `failed` batch behind.
async fn generate_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>> {
    state.authorize(&headers)?;
    let Json(request) = payload.map_err(|e| Error::bad_request(e.body_text()))?;

    let algorithm = request.algorithm.unwrap_or_default();
    let outcome = state
        .orchestrator
        .spawn_batch(&algorithm, request.top_n)
        .await??;

    Ok(Json(GenerateResponse {
        ok: true,
        batch_id: outcome.batch.batch_id,
        algorithm: outcome.batch.algorithm,
        users: outcome.users,
        items: outcome.items,
    }))
}

/// Most recent batches of any status
async fn list_batches(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BatchListQuery>,
) -> Result<Json<BatchListResponse>> {
    state.authorize(&headers)?;

    let batches = state.reader.list_batches(query.limit).await?;
    Ok(Json(BatchListResponse { batches }))
}

/// Latest successful batch's items for a user
async fn get_recommendations(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Query(query): Query<RecommendationsQuery>,
) -> Result<Json<Recommendations>> {
    let algorithm = query
        .algorithm
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .map(str::parse::<Algorithm>)
        .transpose()?;

    let recommendations = state.reader.get_recommendations(user_id, algorithm).await?;
    Ok(Json(recommendations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecommendationConfig;
    use crate::recommendation::MemoryStore;

    fn state(admin_token: Option<&str>) -> AppState {
        let store: Arc<dyn RecommendationStore> = Arc::new(MemoryStore::new());
        let config = RecommendationConfig {
            worker_threads: 1,
            ..RecommendationConfig::default()
        };
        let orchestrator = Arc::new(BatchOrchestrator::new(Arc::clone(&store), config).unwrap());
        AppState::new(store, orchestrator, admin_token.map(String::from))
    }

    #[test]
    fn test_authorize_without_token_is_open() {
        assert!(state(None).authorize(&HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_authorize_checks_header() {
        let state = state(Some("secret"));
        assert!(matches!(
            state.authorize(&HeaderMap::new()),
            Err(Error::Unauthorized { .. })
        ));

        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_TOKEN_HEADER, "wrong".parse().unwrap());
        assert!(state.authorize(&headers).is_err());

        headers.insert(ADMIN_TOKEN_HEADER, "secret".parse().unwrap());
        assert!(state.authorize(&headers).is_ok());
    }
}
