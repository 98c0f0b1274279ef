//! HTTP server.
//!
//! Exposes selection, search, rating, and maintenance over a JSON API, and
//! serves the gallery itself read-only under `server.static_prefix`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Disk and registry counts |
//! | `GET`  | `/categories` | Top-level directories |
//! | `GET`  | `/random_pic` | Biased random pick (`cat`, `q`, `bias`, `alpha`, `redirect`) |
//! | `GET`  | `/search` | Tag and path search (`q`, `limit`) |
//! | `POST` | `/rate` | Record a rating (`{id, score, note?}`) |
//! | `GET`  | `/stats` | One image (`id`) or the leaderboard (`top`) |
//! | `POST` | `/reindex` | Reconcile the gallery (`purge_missing`) |
//! | `POST` | `/sync_subjects` | Tag sync (`limit`) |
//! | `POST` | `/admin/rebuild_fts` | Rebuild the search index (`full`, default true) |
//! | `POST` | `/admin/refresh_fts` | Incremental index refresh |
//! | `POST` | `/admin/refresh_fts_tags` | Alias of `/admin/refresh_fts` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "image not found: abc" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `busy` (503),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front ends on
//! other origins can call the API.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::error::GalleryError;
use crate::fts::{self, RebuildMode};
use crate::metadata::{self, MetadataStore};
use crate::models::SearchHit;
use crate::rate::{self, RateResponse};
use crate::reindex::{self, ReindexReport};
use crate::search;
use crate::select::{self, PickRequest, PickResponse};
use crate::stats::{self, Health, ImageStats};
use crate::tags::{self, SyncReport};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub metadata: Arc<dyn MetadataStore>,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            config: Arc::new(config),
            pool,
            metadata,
        }
    }
}

/// Builds the application router, including the static gallery mount.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let static_prefix = state
        .config
        .server
        .static_prefix
        .trim_end_matches('/')
        .to_string();
    let files = ServeDir::new(&state.config.gallery.root);

    Router::new()
        .route("/health", get(handle_health))
        .route("/categories", get(handle_categories))
        .route("/random_pic", get(handle_random_pic))
        .route("/search", get(handle_search))
        .route("/rate", post(handle_rate))
        .route("/stats", get(handle_stats))
        .route("/reindex", post(handle_reindex))
        .route("/sync_subjects", post(handle_sync_subjects))
        .route("/admin/rebuild_fts", post(handle_rebuild_fts))
        .route("/admin/refresh_fts", post(handle_refresh_fts))
        .route("/admin/refresh_fts_tags", post(handle_refresh_fts))
        .nest_service(&static_prefix, files)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Opens the store, runs migrations, and serves until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = crate::migrate::open(config).await?;
    let metadata = metadata::from_config(&config.metadata);
    let bind_addr = config.server.bind.clone();
    let app = router(AppState::new(config.clone(), pool, metadata));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, gallery = %config.gallery.root.display(), "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<GalleryError> for AppError {
    fn from(err: GalleryError) -> Self {
        match err {
            GalleryError::NotFound(message) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message,
            },
            GalleryError::Validation(message) => bad_request(message),
            GalleryError::Busy => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "busy",
                message: "database is busy, retry later".to_string(),
            },
            other => {
                error!(error = %other, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: other.to_string(),
                }
            }
        }
    }
}

// ============ GET /health, /categories ============

async fn handle_health(State(state): State<AppState>) -> Result<Json<Health>, AppError> {
    Ok(Json(stats::health(&state.pool, &state.config).await?))
}

#[derive(Serialize)]
struct CategoriesResponse {
    categories: Vec<String>,
}

async fn handle_categories(
    State(state): State<AppState>,
) -> Result<Json<CategoriesResponse>, AppError> {
    Ok(Json(CategoriesResponse {
        categories: stats::categories(&state.config)?,
    }))
}

// ============ GET /random_pic ============

#[derive(Debug, Deserialize)]
struct RandomPicParams {
    cat: Option<String>,
    q: Option<String>,
    bias: Option<String>,
    alpha: Option<f64>,
    #[serde(default)]
    redirect: bool,
}

/// Picks an image and either returns it as JSON or redirects (302) to its
/// static URL.
async fn handle_random_pic(
    State(state): State<AppState>,
    Query(params): Query<RandomPicParams>,
) -> Result<Response, AppError> {
    let request = PickRequest {
        category: params.cat,
        query: params.q,
        bias: params.bias,
        alpha: params.alpha,
    };
    let mut rng = StdRng::from_os_rng();
    let image = select::pick(&state.pool, &state.config, &request, &mut rng).await?;
    let payload = PickResponse::new(&image, &state.config.server.static_prefix);

    if params.redirect {
        return Ok((StatusCode::FOUND, [(header::LOCATION, payload.url)]).into_response());
    }
    Ok(Json(payload).into_response())
}

// ============ GET /search ============

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    q: String,
    items: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let items = search::search(
        &state.pool,
        &state.config,
        &params.q,
        params.limit.unwrap_or(10),
    )
    .await?;
    Ok(Json(SearchResponse { q: params.q, items }))
}

// ============ POST /rate ============

#[derive(Debug, Deserialize)]
struct RateBody {
    id: String,
    score: f64,
    note: Option<String>,
}

async fn handle_rate(
    State(state): State<AppState>,
    Json(body): Json<RateBody>,
) -> Result<Json<RateResponse>, AppError> {
    let response = rate::rate(
        &state.pool,
        &state.config,
        state.metadata.as_ref(),
        &body.id,
        body.score,
        body.note.as_deref(),
    )
    .await?;
    Ok(Json(response))
}

// ============ GET /stats ============

#[derive(Debug, Deserialize)]
struct StatsParams {
    id: Option<String>,
    top: Option<i64>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum StatsResponse {
    Image(ImageStats),
    Top { top: Vec<crate::models::ImageRecord> },
}

async fn handle_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<StatsResponse>, AppError> {
    if let Some(id) = params.id.as_deref().filter(|id| !id.is_empty()) {
        let detail = stats::image_stats(&state.pool, id).await?;
        return Ok(Json(StatsResponse::Image(detail)));
    }
    let top = stats::leaderboard(&state.pool, params.top.unwrap_or(stats::DEFAULT_TOP)).await?;
    Ok(Json(StatsResponse::Top { top }))
}

// ============ Maintenance ============

#[derive(Debug, Deserialize)]
struct ReindexParams {
    purge_missing: Option<bool>,
}

/// Reads `purge_missing` from a bare JSON boolean, an object, or an empty
/// body. A query parameter of the same name is used when the body is empty.
fn parse_purge_flag(body: &[u8], query: Option<bool>) -> Result<bool, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(query.unwrap_or(false));
    }
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| bad_request(format!("invalid reindex body: {}", e)))?;
    match value {
        serde_json::Value::Bool(flag) => Ok(flag),
        serde_json::Value::Null => Ok(query.unwrap_or(false)),
        serde_json::Value::Object(map) => match map.get("purge_missing") {
            None | Some(serde_json::Value::Null) => Ok(false),
            Some(serde_json::Value::Bool(flag)) => Ok(*flag),
            Some(other) => Err(bad_request(format!(
                "purge_missing must be a boolean, got {}",
                other
            ))),
        },
        other => Err(bad_request(format!(
            "reindex body must be a boolean or an object, got {}",
            other
        ))),
    }
}

async fn handle_reindex(
    State(state): State<AppState>,
    Query(params): Query<ReindexParams>,
    body: Bytes,
) -> Result<Json<ReindexReport>, AppError> {
    let purge_missing = parse_purge_flag(&body, params.purge_missing)?;
    Ok(Json(
        reindex::reindex(&state.pool, &state.config, purge_missing).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct SyncParams {
    #[serde(default)]
    limit: i64,
}

async fn handle_sync_subjects(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncReport>, AppError> {
    let report = tags::sync_tags(
        &state.pool,
        &state.config,
        state.metadata.as_ref(),
        params.limit,
    )
    .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct RebuildParams {
    full: Option<bool>,
}

async fn handle_rebuild_fts(
    State(state): State<AppState>,
    Query(params): Query<RebuildParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mode = if params.full.unwrap_or(true) {
        RebuildMode::Full
    } else {
        RebuildMode::Incremental
    };
    let report = fts::rebuild(&state.pool, mode).await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "mode": report.mode,
        "rows": report.rows,
    })))
}

async fn handle_refresh_fts(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = fts::rebuild(&state.pool, RebuildMode::Incremental).await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "mode": report.mode,
        "rows": report.rows,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(body: &str) -> Option<bool> {
        parse_purge_flag(body.as_bytes(), None).ok()
    }

    #[test]
    fn test_purge_flag_shapes() {
        assert_eq!(flag(""), Some(false));
        assert_eq!(flag("  \n"), Some(false));
        assert_eq!(flag("true"), Some(true));
        assert_eq!(flag("false"), Some(false));
        assert_eq!(flag(r#"{"purge_missing": true}"#), Some(true));
        assert_eq!(flag("{}"), Some(false));
        assert_eq!(flag("null"), Some(false));
    }

    #[test]
    fn test_purge_flag_rejects_other_shapes() {
        assert_eq!(flag("42"), None);
        assert_eq!(flag(r#"{"purge_missing": "yes"}"#), None);
        assert_eq!(flag("not json"), None);
    }

    #[test]
    fn test_purge_flag_falls_back_to_query() {
        assert!(parse_purge_flag(b"", Some(true)).ok().unwrap_or(false));
    }

    #[test]
    fn test_error_mapping() {
        let e = AppError::from(GalleryError::not_found("image not found: x"));
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.code, "not_found");
        assert_eq!(e.message, "image not found: x");

        let e = AppError::from(GalleryError::validation("bad score"));
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e = AppError::from(GalleryError::Busy);
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(e.code, "busy");
    }
}
