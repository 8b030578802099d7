//! Request DTOs for the render server API
//!
//! Defines the structure of incoming query strings.

use serde::Deserialize;

use crate::engine::MAX_SCALE;
use crate::scheduler::Priority;

/// Query string of the render endpoint (`?scale=&priority=`)
///
/// # Fields
/// - `scale`: Raster scale, defaults to 1.0
/// - `priority`: `low`, `normal`, `high` or `urgent`, defaults to `normal`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderQuery {
    #[serde(default)]
    pub scale: Option<f32>,
    #[serde(default)]
    pub priority: Option<String>,
}

impl RenderQuery {
    /// Validates the query
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        let scale = self.scale();
        if !scale.is_finite() || scale <= 0.0 || scale > MAX_SCALE {
            return Some(format!("Scale must be in (0, {MAX_SCALE}], got {scale}"));
        }
        if let Some(priority) = &self.priority {
            if let Err(e) = priority.parse::<Priority>() {
                return Some(e);
            }
        }
        None
    }

    pub fn scale(&self) -> f32 {
        self.scale.unwrap_or(1.0)
    }

    /// Requested priority, `normal` when absent or unparseable.
    pub fn priority(&self) -> Priority {
        self.priority
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_query_defaults() {
        let query: RenderQuery = serde_json::from_str("{}").unwrap();
        assert!(query.validate().is_none());
        assert_eq!(query.scale(), 1.0);
        assert_eq!(query.priority(), Priority::Normal);
    }

    #[test]
    fn test_render_query_with_values() {
        let json = r#"{"scale": 2.5, "priority": "urgent"}"#;
        let query: RenderQuery = serde_json::from_str(json).unwrap();
        assert!(query.validate().is_none());
        assert_eq!(query.scale(), 2.5);
        assert_eq!(query.priority(), Priority::Urgent);
    }

    #[test]
    fn test_render_query_validation() {
        let query = RenderQuery {
            scale: Some(0.0),
            priority: None,
        };
        assert!(query.validate().unwrap().contains("Scale"));

        let query = RenderQuery {
            scale: Some(9.0),
            priority: None,
        };
        assert!(query.validate().is_some());

        let query = RenderQuery {
            scale: None,
            priority: Some("asap".to_string()),
        };
        assert!(query.validate().unwrap().contains("asap"));
    }
}
