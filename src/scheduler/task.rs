//! Task records and the caller-facing result handle.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::TaskError;
use crate::scheduler::priority::Priority;

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A unit of work to submit, with optional per-task overrides.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub kind: String,
    pub payload: Value,
    pub priority: Priority,
    /// Per-attempt deadline; scheduler default when None
    pub timeout: Option<Duration>,
    /// Total attempts including the first; scheduler default when None
    pub max_attempts: Option<u32>,
}

impl TaskRequest {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            priority: Priority::Normal,
            timeout: None,
            max_attempts: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }
}

/// Successful result of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    pub task_id: String,
    pub data: Value,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Submission to settlement
    pub elapsed: Duration,
}

pub(crate) type Responder = oneshot::Sender<Result<TaskOutput, TaskError>>;

/// Scheduler-owned task record.
#[derive(Debug)]
pub(crate) struct Task {
    pub id: String,
    pub kind: String,
    pub payload: Value,
    pub priority: Priority,
    pub state: TaskState,
    /// Attempts started so far
    pub attempt: u32,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub submitted_at: Instant,
    pub cancelled: bool,
    pub responder: Option<Responder>,
}

impl Task {
    pub fn new(
        id: String,
        request: TaskRequest,
        default_timeout: Duration,
        default_attempts: u32,
        responder: Responder,
    ) -> Self {
        Self {
            id,
            kind: request.kind,
            payload: request.payload,
            priority: request.priority,
            state: TaskState::Pending,
            attempt: 0,
            max_attempts: request.max_attempts.unwrap_or(default_attempts).max(1),
            timeout: request.timeout.unwrap_or(default_timeout),
            submitted_at: Instant::now(),
            cancelled: false,
            responder: Some(responder),
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Settles the task. Later calls are no-ops.
    pub fn settle(&mut self, result: Result<TaskOutput, TaskError>) {
        self.state = if result.is_ok() {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        if let Some(responder) = self.responder.take() {
            // The caller may have dropped its handle
            let _ = responder.send(result);
        }
    }

    pub fn reject(&mut self, error: TaskError) {
        self.settle(Err(error));
    }
}

// == Result Handle ==
/// Awaitable result of a submitted task.
///
/// Resolves exactly once. If the scheduler goes away without settling the
/// task, the handle resolves to `TaskError::Shutdown`.
#[derive(Debug)]
pub struct ResultHandle {
    task_id: String,
    rx: oneshot::Receiver<Result<TaskOutput, TaskError>>,
}

impl ResultHandle {
    pub(crate) fn new(task_id: String, rx: oneshot::Receiver<Result<TaskOutput, TaskError>>) -> Self {
        Self { task_id, rx }
    }

    /// Id to pass to `TaskScheduler::cancel`.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Future for ResultHandle {
    type Output = Result<TaskOutput, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Shutdown {
                task_id: this.task_id.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, task};

    fn task_with(request: TaskRequest) -> (Task, ResultHandle) {
        let (tx, rx) = oneshot::channel();
        let task = Task::new("task-1".to_string(), request, Duration::from_secs(30), 4, tx);
        (task, ResultHandle::new("task-1".to_string(), rx))
    }

    #[test]
    fn test_request_defaults_and_overrides() {
        let (task, _handle) = task_with(TaskRequest::new("render", json!({})));
        assert_eq!(task.priority, Priority::Normal);
        assert_eq!(task.max_attempts, 4);
        assert_eq!(task.timeout, Duration::from_secs(30));
        assert_eq!(task.state, TaskState::Pending);

        let request = TaskRequest::new("render", json!({}))
            .priority(Priority::Urgent)
            .timeout(Duration::from_millis(5))
            .max_attempts(0);
        let (task, _handle) = task_with(request);
        assert_eq!(task.priority, Priority::Urgent);
        assert_eq!(task.max_attempts, 1);
        assert_eq!(task.timeout, Duration::from_millis(5));
    }

    #[test]
    fn test_handle_pending_until_settled() {
        let (mut task, handle) = task_with(TaskRequest::new("decode", Value::Null));
        let mut handle = task::spawn(handle);
        assert_pending!(handle.poll());

        task.settle(Ok(TaskOutput {
            task_id: "task-1".to_string(),
            data: json!(7),
            attempts: 1,
            elapsed: Duration::ZERO,
        }));
        assert_eq!(task.state, TaskState::Completed);

        let output = assert_ready!(handle.poll()).unwrap();
        assert_eq!(output.data, json!(7));
    }

    #[test]
    fn test_settle_is_once() {
        let (mut task, handle) = task_with(TaskRequest::new("decode", Value::Null));
        task.reject(TaskError::Cancelled {
            task_id: "task-1".to_string(),
        });
        task.reject(TaskError::Shutdown {
            task_id: "task-1".to_string(),
        });

        let mut handle = task::spawn(handle);
        let err = assert_ready!(handle.poll()).unwrap_err();
        assert!(matches!(err, TaskError::Cancelled { .. }));
    }

    #[test]
    fn test_dropped_task_resolves_shutdown() {
        let (task, handle) = task_with(TaskRequest::new("decode", Value::Null));
        drop(task);

        let mut handle = task::spawn(handle);
        let err = assert_ready!(handle.poll()).unwrap_err();
        assert_eq!(
            err,
            TaskError::Shutdown {
                task_id: "task-1".to_string()
            }
        );
    }
}
