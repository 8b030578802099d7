//! API Routes
//!
//! Configures the Axum router with all render server endpoints.

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    health_handler, load_handler, page_handler, preload_handler, render_handler, stats_handler,
    unload_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /documents/:id` - Load a text document (body = document text)
/// - `DELETE /documents/:id` - Unload a document with its pages and renders
/// - `GET /documents/:id/pages/:page` - Decoded page text
/// - `GET /documents/:id/pages/:page/render` - Render a page (`?scale=&priority=`)
/// - `POST /documents/:id/preload/:page` - Render the pages around a page
/// - `GET /stats` - Cache, scheduler and pool statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/documents/:id", put(load_handler).delete(unload_handler))
        .route("/documents/:id/pages/:page", get(page_handler))
        .route("/documents/:id/pages/:page/render", get(render_handler))
        .route("/documents/:id/preload/:page", post(preload_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let mut config = EngineConfig::default();
        config.scheduler.max_workers = 1;
        config.sweep_interval = Duration::ZERO;
        create_router(AppState::from_config(&config))
    }

    async fn status_of(app: Router, method: &str, uri: &str, body: &'static str) -> StatusCode {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body))
            .unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let status = status_of(create_test_app(), "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_load_endpoint() {
        let app = create_test_app();
        let status = status_of(app, "PUT", "/documents/memo", "Memo\x0cpage two").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_page_not_loaded() {
        let app = create_test_app();
        let status = status_of(app, "GET", "/documents/nonexistent/pages/1", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_page_number() {
        let app = create_test_app();
        let status = status_of(app, "GET", "/documents/memo/pages/first", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_method_routing() {
        let app = create_test_app();
        let preload = status_of(app.clone(), "GET", "/documents/memo/preload/1", "").await;
        assert_eq!(preload, StatusCode::METHOD_NOT_ALLOWED);
        let render = status_of(app, "POST", "/documents/memo/pages/1/render", "").await;
        assert_eq!(render, StatusCode::METHOD_NOT_ALLOWED);
    }
}
