//! API Handlers
//!
//! HTTP request handlers for each render server endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::engine::{Engine, EngineStats};
use crate::error::{EngineError, Result};
use crate::models::{
    HealthResponse, LoadResponse, PageResponse, PreloadResponse, RenderQuery, RenderResponse,
    UnloadResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Shared rendering engine
    pub engine: Arc<Engine>,
}

impl AppState {
    /// Creates a new AppState around an engine.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Creates a new AppState with a synthetic-backend engine built from
    /// configuration.
    pub fn from_config(config: &crate::config::EngineConfig) -> Self {
        Self::new(Engine::synthetic(config.clone()))
    }
}

/// Handler for PUT /documents/:id
///
/// Decodes the request body as a text document and caches it.
pub async fn load_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<LoadResponse>> {
    let document = state.engine.load(&id, body).await?;
    Ok(Json(LoadResponse::from(document.as_ref())))
}

/// Handler for DELETE /documents/:id
pub async fn unload_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UnloadResponse>> {
    if !state.engine.unload(&id).await {
        return Err(EngineError::DocumentNotLoaded(id));
    }
    Ok(Json(UnloadResponse::new(id)))
}

/// Handler for GET /documents/:id/pages/:page
pub async fn page_handler(
    State(state): State<AppState>,
    Path((id, page)): Path<(String, usize)>,
) -> Result<Json<PageResponse>> {
    let page = state.engine.get_page(&id, page).await?;
    Ok(Json(PageResponse::from(page.as_ref())))
}

/// Handler for GET /documents/:id/pages/:page/render
///
/// Accepts `scale` and `priority` query parameters.
pub async fn render_handler(
    State(state): State<AppState>,
    Path((id, page)): Path<(String, usize)>,
    Query(query): Query<RenderQuery>,
) -> Result<Json<RenderResponse>> {
    if let Some(error_msg) = query.validate() {
        return Err(EngineError::InvalidRequest(error_msg));
    }

    let output = state
        .engine
        .render(&id, page, query.scale(), query.priority())
        .await?;
    Ok(Json(RenderResponse::from(output.as_ref())))
}

/// Handler for POST /documents/:id/preload/:page
///
/// Renders the neighbourhood of the given page.
pub async fn preload_handler(
    State(state): State<AppState>,
    Path((id, page)): Path<(String, usize)>,
) -> Result<Json<PreloadResponse>> {
    let rendered = state.engine.preload(&id, page).await?;
    Ok(Json(PreloadResponse {
        document_id: id,
        current_page: page,
        rendered,
    }))
}

/// Handler for GET /stats
///
/// Returns cache, scheduler and pool statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<EngineStats> {
    Json(state.engine.stats().await)
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
