//! Values produced by the engine and held in its caches.

use serde::Serialize;

/// A decoded document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    /// Raw document text, kept for page and render jobs
    #[serde(skip)]
    pub source: String,
    pub page_count: usize,
    /// First non-empty line, if any
    pub title: Option<String>,
}

/// A decoded page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub document_id: String,
    /// 1-based
    pub number: usize,
    pub text: String,
    pub line_count: usize,
}

/// An 8-bit grayscale raster of one page at one scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderOutput {
    pub document_id: String,
    pub page: usize,
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    /// Row-major, `width * height` bytes
    #[serde(skip)]
    pub pixels: Vec<u8>,
}

impl RenderOutput {
    /// Mean pixel value, 255 for a blank page.
    pub fn mean_luma(&self) -> f64 {
        if self.pixels.is_empty() {
            return 255.0;
        }
        let sum: u64 = self.pixels.iter().map(|&p| p as u64).sum();
        sum as f64 / self.pixels.len() as f64
    }
}

pub(crate) fn page_key(document_id: &str, page: usize) -> String {
    format!("{document_id}:{page}")
}

pub(crate) fn render_key(document_id: &str, page: usize, scale: f32) -> String {
    format!("{document_id}:{page}@{scale:.2}")
}

/// Prefix shared by every page and render key of a document.
pub(crate) fn document_prefix(document_id: &str) -> String {
    format!("{document_id}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_keys() {
        assert_eq!(page_key("report", 3), "report:3");
        assert_eq!(render_key("report", 3, 1.5), "report:3@1.50");
        assert!(render_key("report", 3, 1.0).starts_with(&document_prefix("report")));
    }

    #[test]
    fn test_mean_luma() {
        let output = RenderOutput {
            document_id: "d".to_string(),
            page: 1,
            scale: 1.0,
            width: 2,
            height: 1,
            pixels: vec![0, 255],
        };
        assert_eq!(output.mean_luma(), 127.5);
    }
}
