//! Execution-unit message protocol.
//!
//! Outbound: `{id, kind, payload}`. Inbound: `{id, outcome: "success", data}`
//! or `{id, outcome: "error", error}`. Every inbound message echoes the id of
//! the request it answers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Work sent to a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRequest {
    /// Correlation id, unique for the lifetime of the pool
    pub id: String,
    pub kind: String,
    pub payload: Value,
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Outcome {
    Success { data: Value },
    Error { error: String },
}

/// A unit's answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResponse {
    /// Id of the request being answered
    pub id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Everything a unit can emit on its outbound channel.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitMessage {
    /// Handshake, sent once before any response
    Ready { unit_id: String },
    Response(UnitResponse),
}

/// Correlation id for one attempt of a task.
///
/// Task ids are unique and attempts only grow, so the pair never repeats.
pub fn message_id(task_id: &str, attempt: u32) -> String {
    format!("{task_id}#{attempt}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_wire_shape() {
        let resp = UnitResponse {
            id: "task-1#1".to_string(),
            outcome: Outcome::Success {
                data: json!({"page_count": 3}),
            },
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({"id": "task-1#1", "outcome": "success", "data": {"page_count": 3}})
        );
    }

    #[test]
    fn test_error_wire_shape_parses() {
        let raw = r#"{"id":"task-2#3","outcome":"error","error":"corrupt stream"}"#;
        let resp: UnitResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.id, "task-2#3");
        assert_eq!(
            resp.outcome,
            Outcome::Error {
                error: "corrupt stream".to_string()
            }
        );
    }

    #[test]
    fn test_request_wire_shape() {
        let req = UnitRequest {
            id: message_id("task-9", 2),
            kind: "render".to_string(),
            payload: json!({"scale": 1.5}),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["id"], "task-9#2");
        assert_eq!(value["kind"], "render");
        assert_eq!(value["payload"]["scale"], 1.5);
    }

    #[test]
    fn test_message_ids_distinct_per_attempt() {
        assert_ne!(message_id("task-1", 1), message_id("task-1", 2));
        assert_ne!(message_id("task-1", 11), message_id("task-11", 1));
    }
}
