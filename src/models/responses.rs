//! Response DTOs for the render server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::engine::{Document, Page, RenderOutput};

/// Response body for PUT /documents/:id
#[derive(Debug, Clone, Serialize)]
pub struct LoadResponse {
    /// The document id
    pub id: String,
    /// Number of pages found by the decoder
    pub page_count: usize,
    /// First non-empty line of the document
    pub title: Option<String>,
}

impl From<&Document> for LoadResponse {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id.clone(),
            page_count: document.page_count,
            title: document.title.clone(),
        }
    }
}

/// Response body for DELETE /documents/:id
#[derive(Debug, Clone, Serialize)]
pub struct UnloadResponse {
    /// Success message
    pub message: String,
    /// The document that was unloaded
    pub id: String,
}

impl UnloadResponse {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            message: format!("Document '{}' unloaded successfully", id),
            id,
        }
    }
}

/// Response body for GET /documents/:id/pages/:page
#[derive(Debug, Clone, Serialize)]
pub struct PageResponse {
    pub document_id: String,
    pub page: usize,
    pub text: String,
    pub line_count: usize,
}

impl From<&Page> for PageResponse {
    fn from(page: &Page) -> Self {
        Self {
            document_id: page.document_id.clone(),
            page: page.number,
            text: page.text.clone(),
            line_count: page.line_count,
        }
    }
}

/// Response body for GET /documents/:id/pages/:page/render
///
/// Describes the raster rather than shipping its pixels.
#[derive(Debug, Clone, Serialize)]
pub struct RenderResponse {
    pub document_id: String,
    pub page: usize,
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    /// Raster size in bytes
    pub bytes: usize,
    /// Mean gray level, 255 for a blank page
    pub mean_luma: f64,
}

impl From<&RenderOutput> for RenderResponse {
    fn from(output: &RenderOutput) -> Self {
        Self {
            document_id: output.document_id.clone(),
            page: output.page,
            scale: output.scale,
            width: output.width,
            height: output.height,
            bytes: output.pixels.len(),
            mean_luma: output.mean_luma(),
        }
    }
}

/// Response body for POST /documents/:id/preload/:page
#[derive(Debug, Clone, Serialize)]
pub struct PreloadResponse {
    pub document_id: String,
    pub current_page: usize,
    /// Pages rendered by this call; already cached pages are not listed
    pub rendered: Vec<usize>,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
