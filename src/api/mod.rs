//! API Module
//!
//! HTTP handlers and routing for the render server REST API.
//!
//! # Endpoints
//! - `PUT /documents/:id` - Load a document
//! - `DELETE /documents/:id` - Unload a document
//! - `GET /documents/:id/pages/:page` - Decoded page
//! - `GET /documents/:id/pages/:page/render` - Rendered page
//! - `POST /documents/:id/preload/:page` - Preload neighbouring pages
//! - `GET /stats` - Engine statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
