//! Error types for the rendering core
//!
//! Each layer has its own error enum built with thiserror. Cache errors are
//! returned synchronously, task errors travel only through a task's
//! `ResultHandle`, and `EngineError` unifies both for the engine and the
//! HTTP surface.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Errors raised synchronously by `BoundedCache`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A single item is larger than the whole cache budget.
    #[error("Item '{key}' of {size} bytes exceeds cache capacity of {max_size} bytes")]
    CapacityExceeded {
        key: String,
        size: usize,
        max_size: usize,
    },
}

// == Pool Error Enum ==
/// Lifecycle failures of the worker pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has been shut down and hands out no more units.
    #[error("Worker pool is closed")]
    Closed,

    /// The OS refused to start a unit thread.
    #[error("Failed to spawn execution unit: {0}")]
    SpawnFailed(String),

    /// A freshly spawned unit never confirmed it was ready.
    #[error("Execution unit {0} failed its ready handshake")]
    HandshakeFailed(String),
}

// == Task Error Enum ==
/// Terminal rejection of a scheduled task.
///
/// Every variant carries the task id; failures also carry the number of
/// attempts that were made and the cause of the last one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The execution unit reported an error on every attempt.
    #[error("Task {task_id} failed after {attempts} attempt(s): {cause}")]
    WorkerFailure {
        task_id: String,
        attempts: u32,
        cause: String,
    },

    /// No response arrived within the deadline on the last attempt.
    #[error("Task {task_id} timed out after {attempts} attempt(s) ({timeout:?} per attempt)")]
    Timeout {
        task_id: String,
        attempts: u32,
        timeout: Duration,
    },

    /// The caller cancelled the task.
    #[error("Task {task_id} was cancelled")]
    Cancelled { task_id: String },

    /// The scheduler was torn down before the task settled.
    #[error("Task {task_id} rejected: scheduler shut down")]
    Shutdown { task_id: String },
}

impl TaskError {
    /// Returns the id of the task this error belongs to.
    pub fn task_id(&self) -> &str {
        match self {
            TaskError::WorkerFailure { task_id, .. }
            | TaskError::Timeout { task_id, .. }
            | TaskError::Cancelled { task_id }
            | TaskError::Shutdown { task_id } => task_id,
        }
    }

    /// Number of attempts made before the rejection, zero when the task
    /// never reached a unit.
    pub fn attempts(&self) -> u32 {
        match self {
            TaskError::WorkerFailure { attempts, .. } | TaskError::Timeout { attempts, .. } => {
                *attempts
            }
            TaskError::Cancelled { .. } | TaskError::Shutdown { .. } => 0,
        }
    }
}

// == Engine Error Enum ==
/// Unified error type for the engine and its HTTP surface.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Task(#[from] TaskError),

    /// The document is not in the document cache (never loaded, evicted or expired).
    #[error("Document not loaded: {0}")]
    DocumentNotLoaded(String),

    /// Page numbers are 1-based and bounded by the document's page count.
    #[error("Page {page} out of range for document '{document_id}' ({page_count} pages)")]
    PageOutOfRange {
        document_id: String,
        page: usize,
        page_count: usize,
    },

    /// A unit answered with data that does not match the expected shape.
    #[error("Invalid task output: {0}")]
    InvalidOutput(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::Cache(CacheError::CapacityExceeded { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            EngineError::Task(TaskError::WorkerFailure { .. }) => StatusCode::BAD_GATEWAY,
            EngineError::Task(TaskError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            EngineError::Task(TaskError::Cancelled { .. }) => StatusCode::CONFLICT,
            EngineError::Task(TaskError::Shutdown { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::DocumentNotLoaded(_) | EngineError::PageOutOfRange { .. } => {
                StatusCode::NOT_FOUND
            }
            EngineError::InvalidOutput(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_accessors() {
        let err = TaskError::Timeout {
            task_id: "task-7".to_string(),
            attempts: 3,
            timeout: Duration::from_millis(50),
        };
        assert_eq!(err.task_id(), "task-7");
        assert_eq!(err.attempts(), 3);

        let err = TaskError::Cancelled {
            task_id: "task-8".to_string(),
        };
        assert_eq!(err.attempts(), 0);
    }

    #[test]
    fn test_worker_failure_message_carries_cause() {
        let err = TaskError::WorkerFailure {
            task_id: "task-1".to_string(),
            attempts: 2,
            cause: "bad xref table".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("task-1"));
        assert!(msg.contains("2 attempt"));
        assert!(msg.contains("bad xref table"));
    }

    #[test]
    fn test_status_codes() {
        let resp = EngineError::DocumentNotLoaded("doc".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = EngineError::from(CacheError::CapacityExceeded {
            key: "k".to_string(),
            size: 10,
            max_size: 5,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let resp = EngineError::from(TaskError::Timeout {
            task_id: "t".to_string(),
            attempts: 1,
            timeout: Duration::from_secs(1),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
