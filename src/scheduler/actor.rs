//! Priority scheduler with retry and per-attempt timeouts.
//!
//! A single actor task owns the queue and the in-flight table. Callers talk
//! to it over a command channel; each dispatched attempt is watched by its
//! own task, which owns the unit until the attempt settles and then hands
//! both back to the actor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{PoolError, TaskError};
use crate::events::{Event, EventBus};
use crate::scheduler::priority::{Priority, PriorityQueue};
use crate::scheduler::task::{ResultHandle, Task, TaskOutput, TaskRequest, TaskState};
use crate::worker::{
    message_id, AttemptOutcome, ExecutionUnit, Outcome, TaskHandler, UnitRequest, WorkerPool,
};

/// Scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    /// Tasks accepted since start
    pub total_tasks: u64,
    pub completed_tasks: u64,
    /// Rejected after exhausting attempts, or by shutdown
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    /// Attempts re-enqueued after a failure or timeout
    pub retried_attempts: u64,
    pub timed_out_attempts: u64,
    /// Tasks currently running on a unit
    pub active_workers: usize,
    pub queued_tasks: usize,
    /// Running mean of submission-to-completion time of completed tasks
    pub average_task_time_ms: f64,
}

enum Command {
    Submit(Task),
    Cancel {
        task_id: String,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<SchedulerStats>,
    },
    Resize {
        min_workers: usize,
        max_workers: usize,
        reply: oneshot::Sender<Result<(), PoolError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// One finished attempt, sent from a watcher back to the actor.
struct Settled {
    task_id: String,
    unit: ExecutionUnit,
    outcome: AttemptOutcome,
}

struct Running {
    task: Task,
    watcher: JoinHandle<()>,
}

// == Task Scheduler ==
/// Cloneable handle to the scheduler actor.
///
/// The actor stops once every handle is dropped, rejecting whatever is
/// still pending.
#[derive(Clone)]
pub struct TaskScheduler {
    commands: mpsc::UnboundedSender<Command>,
    pool: Arc<WorkerPool>,
    config: SchedulerConfig,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}

impl TaskScheduler {
    /// Creates the pool and starts the actor. Must be called inside a tokio
    /// runtime.
    pub fn new(config: SchedulerConfig, handler: Arc<dyn TaskHandler>, events: EventBus) -> Self {
        let pool = Arc::new(WorkerPool::new(config.pool_config(), handler));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            pool: Arc::clone(&pool),
            events,
            queue: PriorityQueue::new(),
            running: HashMap::new(),
            settled_tx,
            stats: SchedulerStats::default(),
            closed: false,
        };
        tokio::spawn(actor.run(commands_rx, settled_rx));

        Self {
            commands: commands_tx,
            pool,
            config,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    // == Submit ==
    /// Queues a task with the default timeout and attempt budget.
    pub fn submit(&self, kind: &str, payload: Value, priority: Priority) -> ResultHandle {
        self.submit_request(TaskRequest::new(kind, payload).priority(priority))
    }

    /// Queues a task. Errors, including shutdown, arrive through the handle.
    pub fn submit_request(&self, request: TaskRequest) -> ResultHandle {
        let task_id = format!("task-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        let task = Task::new(
            task_id.clone(),
            request,
            self.config.task_timeout,
            self.config.max_attempts(),
            tx,
        );
        // If the actor is gone the task is dropped with its responder and
        // the handle resolves to Shutdown
        let _ = self.commands.send(Command::Submit(task));
        ResultHandle::new(task_id, rx)
    }

    // == Cancel ==
    /// Cancels a queued or running task. Returns false if the task is
    /// unknown or already settled.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::Cancel {
            task_id: task_id.to_string(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    // == Statistics ==
    pub async fn statistics(&self) -> SchedulerStats {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stats { reply }).is_err() {
            return SchedulerStats::default();
        }
        rx.await.unwrap_or_default()
    }

    // == Resize ==
    /// Changes the pool limits. Queued tasks are dispatched right away if
    /// the cap grew.
    pub async fn resize(&self, min_workers: usize, max_workers: usize) -> Result<(), PoolError> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Resize {
            min_workers,
            max_workers,
            reply,
        };
        if self.commands.send(command).is_err() {
            return Err(PoolError::Closed);
        }
        rx.await.unwrap_or(Err(PoolError::Closed))
    }

    // == Shutdown ==
    /// Rejects queued tasks, then in-flight tasks, then terminates the pool.
    /// Later submissions are rejected immediately.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

// == Actor ==
struct Actor {
    pool: Arc<WorkerPool>,
    events: EventBus,
    queue: PriorityQueue<Task>,
    running: HashMap<String, Running>,
    settled_tx: mpsc::UnboundedSender<Settled>,
    stats: SchedulerStats,
    closed: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut settled: mpsc::UnboundedReceiver<Settled>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(attempt) = settled.recv() => self.on_settled(attempt).await,
            }

            // Everything already submitted competes by priority before
            // the next dispatch
            while let Ok(command) = commands.try_recv() {
                self.handle(command).await;
            }
            self.dispatch().await;
        }

        self.teardown();
        debug!("Scheduler actor stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Submit(mut task) => {
                if self.closed {
                    task.reject(TaskError::Shutdown {
                        task_id: task.id.clone(),
                    });
                    return;
                }
                self.stats.total_tasks += 1;
                debug!(task = %task.id, kind = %task.kind, priority = %task.priority, "Task queued");
                let priority = task.priority;
                self.queue.push(task, priority);
            }
            Command::Cancel { task_id, reply } => {
                let _ = reply.send(self.cancel(&task_id));
            }
            Command::Stats { reply } => {
                let mut stats = self.stats.clone();
                stats.active_workers = self.running.len();
                stats.queued_tasks = self.queue.len();
                let _ = reply.send(stats);
            }
            Command::Resize {
                min_workers,
                max_workers,
                reply,
            } => {
                let _ = reply.send(self.pool.resize(min_workers, max_workers).await);
            }
            Command::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
            }
        }
    }

    fn cancel(&mut self, task_id: &str) -> bool {
        if let Some(mut task) = self.queue.remove_where(|task| task.id == task_id) {
            info!(task = %task_id, "Cancelled queued task");
            self.reject(&mut task, TaskError::Cancelled {
                task_id: task_id.to_string(),
            });
            return true;
        }
        match self.running.get_mut(task_id) {
            Some(running) if !running.task.cancelled => {
                info!(task = %task_id, "Running task marked for cancellation");
                running.task.cancelled = true;
                true
            }
            _ => false,
        }
    }

    // == Dispatch ==
    async fn dispatch(&mut self) {
        while !self.closed && !self.queue.is_empty() {
            let unit = match self.pool.try_acquire().await {
                Ok(Some(unit)) => unit,
                // Saturated: wait for a running task to settle
                Ok(None) => break,
                Err(PoolError::Closed) => break,
                Err(e) => {
                    warn!("Could not obtain an execution unit: {}", e);
                    // Nothing in flight will trigger another dispatch, so
                    // fail the head task instead of stalling the queue
                    if !self.running.is_empty() {
                        break;
                    }
                    if let Some(mut task) = self.queue.pop() {
                        let error = TaskError::WorkerFailure {
                            task_id: task.id.clone(),
                            attempts: task.attempt,
                            cause: e.to_string(),
                        };
                        self.reject(&mut task, error);
                    }
                    continue;
                }
            };

            match self.queue.pop() {
                Some(task) => self.start(task, unit),
                None => {
                    self.pool.release(unit);
                    break;
                }
            }
        }
    }

    fn start(&mut self, mut task: Task, mut unit: ExecutionUnit) {
        task.attempt += 1;
        task.state = TaskState::Running;
        unit.bind(&task.id);

        let request_id = message_id(&task.id, task.attempt);
        let request = UnitRequest {
            id: request_id.clone(),
            kind: task.kind.clone(),
            payload: task.payload.clone(),
        };
        debug!(
            task = %task.id,
            unit = %unit.id(),
            attempt = task.attempt,
            "Dispatching task"
        );

        let timeout = task.timeout;
        let task_id = task.id.clone();
        let settled = self.settled_tx.clone();
        let watcher = tokio::spawn(async move {
            let outcome = match unit.send(request) {
                Ok(()) => unit.await_response(&request_id, timeout).await,
                Err(_) => AttemptOutcome::Disconnected,
            };
            let _ = settled.send(Settled {
                task_id,
                unit,
                outcome,
            });
        });

        self.running.insert(task.id.clone(), Running { task, watcher });
    }

    // == Settlement ==
    async fn on_settled(&mut self, attempt: Settled) {
        let Settled {
            task_id,
            unit,
            outcome,
        } = attempt;

        let Some(Running { mut task, .. }) = self.running.remove(&task_id) else {
            // Torn down while the attempt was in flight
            self.pool.release(unit);
            return;
        };

        let error = match outcome {
            AttemptOutcome::Response(Outcome::Success { data }) => {
                self.pool.recycle(unit, true).await;
                if task.cancelled {
                    self.reject_cancelled(&mut task);
                } else {
                    self.complete(task, data);
                }
                return;
            }
            AttemptOutcome::Response(Outcome::Error { error }) => {
                self.pool.recycle(unit, false).await;
                TaskError::WorkerFailure {
                    task_id: task.id.clone(),
                    attempts: task.attempt,
                    cause: error,
                }
            }
            AttemptOutcome::TimedOut => {
                self.stats.timed_out_attempts += 1;
                warn!(task = %task.id, attempt = task.attempt, timeout = ?task.timeout, "Task attempt timed out");
                self.pool.recycle(unit, false).await;
                TaskError::Timeout {
                    task_id: task.id.clone(),
                    attempts: task.attempt,
                    timeout: task.timeout,
                }
            }
            AttemptOutcome::Disconnected => {
                warn!(task = %task.id, unit = %unit.id(), "Execution unit disconnected mid-task");
                self.pool.remove(unit).await;
                TaskError::WorkerFailure {
                    task_id: task.id.clone(),
                    attempts: task.attempt,
                    cause: "execution unit disconnected".to_string(),
                }
            }
        };

        if task.cancelled {
            self.reject_cancelled(&mut task);
        } else if task.has_attempts_left() && !self.closed {
            self.stats.retried_attempts += 1;
            debug!(task = %task.id, attempt = task.attempt, "Retrying task: {}", error);
            task.state = TaskState::Pending;
            let priority = task.priority;
            self.queue.push(task, priority);
        } else {
            warn!(task = %task.id, "Task failed: {}", error);
            self.reject(&mut task, error);
        }
    }

    fn complete(&mut self, mut task: Task, data: Value) {
        let elapsed = task.submitted_at.elapsed();
        self.stats.completed_tasks += 1;
        let n = self.stats.completed_tasks as f64;
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.stats.average_task_time_ms += (ms - self.stats.average_task_time_ms) / n;

        self.events.publish(Event::TaskCompleted {
            task_id: task.id.clone(),
            kind: task.kind.clone(),
            attempts: task.attempt,
            elapsed_ms: elapsed.as_millis() as u64,
        });
        let output = TaskOutput {
            task_id: task.id.clone(),
            data,
            attempts: task.attempt,
            elapsed,
        };
        task.settle(Ok(output));
    }

    fn reject_cancelled(&mut self, task: &mut Task) {
        let error = TaskError::Cancelled {
            task_id: task.id.clone(),
        };
        self.reject(task, error);
    }

    fn reject(&mut self, task: &mut Task, error: TaskError) {
        if matches!(error, TaskError::Cancelled { .. }) {
            self.stats.cancelled_tasks += 1;
        } else {
            self.stats.failed_tasks += 1;
        }
        self.events.publish(Event::TaskFailed {
            task_id: task.id.clone(),
            kind: task.kind.clone(),
            error: error.to_string(),
        });
        task.reject(error);
    }

    // == Teardown ==
    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let queued = self.queue.drain();
        let queued_count = queued.len();
        for mut task in queued {
            let error = TaskError::Shutdown {
                task_id: task.id.clone(),
            };
            self.reject(&mut task, error);
        }

        let in_flight: Vec<Running> = self.running.drain().map(|(_, running)| running).collect();
        let in_flight_count = in_flight.len();
        for Running { mut task, watcher } in in_flight {
            // Dropping the watcher drops its unit, which disconnects the thread
            watcher.abort();
            let error = TaskError::Shutdown {
                task_id: task.id.clone(),
            };
            self.reject(&mut task, error);
        }

        self.pool.shutdown();
        info!(
            queued = queued_count,
            in_flight = in_flight_count,
            "Scheduler shut down"
        );
    }
}
