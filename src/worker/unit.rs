//! Execution units: one OS thread per unit, reachable only by messages.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::PoolError;
use crate::worker::protocol::{Outcome, UnitMessage, UnitRequest, UnitResponse};

// == Task Handler ==
/// The work a unit performs for one request.
///
/// Implementations are shared read-only between units, so they must not
/// rely on interior mutability for correctness.
pub trait TaskHandler: Send + Sync + 'static {
    fn handle(&self, kind: &str, payload: &Value) -> Result<Value, String>;
}

impl<F> TaskHandler for F
where
    F: Fn(&str, &Value) -> Result<Value, String> + Send + Sync + 'static,
{
    fn handle(&self, kind: &str, payload: &Value) -> Result<Value, String> {
        self(kind, payload)
    }
}

/// How one attempt on a unit ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The unit answered the matching request
    Response(Outcome),
    /// No matching answer before the deadline
    TimedOut,
    /// The unit's thread is gone
    Disconnected,
}

// == Execution Unit ==
/// Handle to an isolated worker thread.
///
/// The handle is owned by exactly one party at a time: the pool while idle,
/// or whoever acquired it while busy. Dropping it disconnects the request
/// channel, which makes the thread exit after its current request.
#[derive(Debug)]
pub struct ExecutionUnit {
    id: String,
    requests: std_mpsc::Sender<UnitRequest>,
    messages: mpsc::UnboundedReceiver<UnitMessage>,
    thread: Option<JoinHandle<()>>,
    current_task: Option<String>,
    completed: u64,
    failed: u64,
    /// Failed attempts since the last success
    consecutive_failures: u32,
    /// When the unit last went idle
    idle_since: Instant,
}

impl ExecutionUnit {
    /// Starts the unit thread. The unit is not usable until
    /// [`ExecutionUnit::handshake`] succeeds.
    pub(crate) fn spawn(id: String, handler: Arc<dyn TaskHandler>) -> Result<Self, PoolError> {
        let (request_tx, request_rx) = std_mpsc::channel::<UnitRequest>();
        let (message_tx, message_rx) = mpsc::unbounded_channel::<UnitMessage>();

        let unit_id = id.clone();
        let thread = thread::Builder::new()
            .name(id.clone())
            .spawn(move || run_unit(unit_id, handler, request_rx, message_tx))
            .map_err(|e| PoolError::SpawnFailed(e.to_string()))?;

        Ok(Self {
            id,
            requests: request_tx,
            messages: message_rx,
            thread: Some(thread),
            current_task: None,
            completed: 0,
            failed: 0,
            consecutive_failures: 0,
            idle_since: Instant::now(),
        })
    }

    /// Waits for the unit to announce it is ready.
    pub(crate) async fn handshake(&mut self, timeout: Duration) -> Result<(), PoolError> {
        match tokio::time::timeout(timeout, self.messages.recv()).await {
            Ok(Some(UnitMessage::Ready { unit_id })) if unit_id == self.id => Ok(()),
            _ => Err(PoolError::HandshakeFailed(self.id.clone())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_busy(&self) -> bool {
        self.current_task.is_some()
    }

    /// Task currently bound to this unit, if any.
    pub fn current_task(&self) -> Option<&str> {
        self.current_task.as_deref()
    }

    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    pub fn failed_count(&self) -> u64 {
        self.failed
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Time since the unit was last released, zero while it is bound.
    pub fn idle_for(&self) -> Duration {
        if self.is_busy() {
            Duration::ZERO
        } else {
            self.idle_since.elapsed()
        }
    }

    pub(crate) fn bind(&mut self, task_id: &str) {
        self.current_task = Some(task_id.to_string());
    }

    pub(crate) fn unbind(&mut self) {
        self.current_task = None;
        self.idle_since = Instant::now();
    }

    pub(crate) fn record(&mut self, success: bool) {
        if success {
            self.completed += 1;
            self.consecutive_failures = 0;
        } else {
            self.failed += 1;
            self.consecutive_failures += 1;
        }
    }

    // == Messaging ==
    /// Posts a request to the unit. Hands the request back if the unit's
    /// thread has exited.
    pub fn send(&self, request: UnitRequest) -> Result<(), UnitRequest> {
        self.requests.send(request).map_err(|e| e.0)
    }

    /// Next response from the unit, or None once its thread has exited.
    pub async fn recv(&mut self) -> Option<UnitResponse> {
        loop {
            match self.messages.recv().await? {
                UnitMessage::Response(response) => return Some(response),
                UnitMessage::Ready { .. } => continue,
            }
        }
    }

    /// Waits for the answer to `message_id`, discarding stale answers to
    /// earlier requests that arrive first.
    pub async fn await_response(&mut self, message_id: &str, timeout: Duration) -> AttemptOutcome {
        let wait = async {
            loop {
                match self.recv().await {
                    Some(response) if response.id == message_id => {
                        return AttemptOutcome::Response(response.outcome)
                    }
                    Some(stale) => {
                        debug!(unit = %self.id, stale = %stale.id, "Discarding stale unit response");
                    }
                    None => return AttemptOutcome::Disconnected,
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(AttemptOutcome::TimedOut)
    }

    /// Disconnects the unit. A thread stuck inside a handler cannot be
    /// interrupted; it is detached and exits when the handler returns.
    pub(crate) fn terminate(mut self) {
        debug!(
            unit = %self.id,
            completed = self.completed,
            failed = self.failed,
            "Terminating execution unit"
        );
        if let Some(thread) = self.thread.take() {
            if thread.is_finished() {
                let _ = thread.join();
            }
        }
    }
}

/// Body of a unit thread.
fn run_unit(
    unit_id: String,
    handler: Arc<dyn TaskHandler>,
    requests: std_mpsc::Receiver<UnitRequest>,
    messages: mpsc::UnboundedSender<UnitMessage>,
) {
    if messages
        .send(UnitMessage::Ready {
            unit_id: unit_id.clone(),
        })
        .is_err()
    {
        return;
    }

    while let Ok(request) = requests.recv() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(&request.kind, &request.payload)
        }));
        let outcome = match result {
            Ok(Ok(data)) => Outcome::Success { data },
            Ok(Err(error)) => Outcome::Error { error },
            Err(panic) => {
                let error = panic_message(panic.as_ref());
                warn!(unit = %unit_id, request = %request.id, "Task handler panicked: {}", error);
                Outcome::Error { error }
            }
        };

        let response = UnitResponse {
            id: request.id,
            outcome,
        };
        if messages.send(UnitMessage::Response(response)).is_err() {
            break;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_string()
    }
}
