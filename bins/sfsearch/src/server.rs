//! HTTP surface of the search engine.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use storefront_core::Error;
use storefront_search::filter::FilterOptions;
use storefront_search::{BackgroundTasks, SearchEngine, SearchError, SearchRequest, SearchResponse, Suggestion};
use storefront_telemetry::metrics;
use uuid::Uuid;

type AppState = Arc<SearchEngine>;

/// Error body: `{"error": <ErrorReport>}` with the code's HTTP status.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_report() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SuggestParams {
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    pub prefix: String,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Deserialize)]
pub struct FilterParams {
    pub category_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    pub search_id: Uuid,
    pub product_ids: Vec<String>,
}

pub fn router(engine: AppState) -> Router {
    Router::new()
        .route("/search", post(search))
        .route("/search/suggestions", get(suggestions))
        .route("/search/filters", get(filter_options))
        .route("/search/selections", post(log_selection))
        .route("/search/index/refresh", post(refresh_index))
        .route("/search/stats", get(stats))
        .route("/health", get(health_check))
        .with_state(engine)
}

/// Serve until ctrl-c, with the background tasks running alongside.
pub async fn serve(engine: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let mut tasks = BackgroundTasks::spawn_all(&engine);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Search service listening");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Search service shutting down");
        })
        .await?;

    tasks.shutdown();
    Ok(())
}

async fn health_check(State(engine): State<AppState>) -> impl IntoResponse {
    let ready = engine.index_generation() > 0;
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(serde_json::json!({
            "status": if ready { "ok" } else { "loading" },
            "index_generation": engine.index_generation(),
        })),
    )
}

async fn search(
    State(engine): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    Ok(Json(engine.search(request).await?))
}

async fn suggestions(
    State(engine): State<AppState>,
    Query(params): Query<SuggestParams>,
) -> Json<SuggestionsResponse> {
    let limit = params.limit.unwrap_or(10);
    Json(SuggestionsResponse {
        suggestions: engine.suggestions(&params.q, limit),
        prefix: params.q,
    })
}

async fn filter_options(
    State(engine): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Result<Json<FilterOptions>, ApiError> {
    Ok(Json(engine.filter_options(params.category_id.as_deref())?))
}

async fn log_selection(
    State(engine): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> impl IntoResponse {
    let accepted = engine.log_selection(request.search_id, request.product_ids);
    (StatusCode::ACCEPTED, Json(serde_json::json!({ "accepted": accepted })))
}

async fn refresh_index(State(engine): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let generation = engine.refresh_index().await?;
    Ok(Json(serde_json::json!({ "generation": generation })))
}

async fn stats(State(engine): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "engine": engine.stats(),
        "metrics": metrics().export_json(),
    }))
}
