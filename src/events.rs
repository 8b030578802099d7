//! Engine lifecycle notifications.
//!
//! One broadcast channel carries a closed set of events. Slow subscribers
//! lose the oldest events rather than blocking publishers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::cache::EvictionReason;

/// Buffered events per subscriber before lagging.
pub const EVENT_CAPACITY: usize = 256;

/// Everything the engine reports to the outside.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    DocumentLoaded {
        document_id: String,
        page_count: usize,
        at: DateTime<Utc>,
    },
    PageDecoded {
        document_id: String,
        page: usize,
    },
    PageRendered {
        document_id: String,
        page: usize,
        scale: f32,
        width: u32,
        height: u32,
    },
    TaskCompleted {
        task_id: String,
        kind: String,
        attempts: u32,
        elapsed_ms: u64,
    },
    TaskFailed {
        task_id: String,
        kind: String,
        error: String,
    },
    CacheEvicted {
        cache: String,
        key: String,
        reason: EvictionReason,
    },
}

/// Receives events from [`EventBus::attach`].
pub trait EventListener: Send + 'static {
    fn on_event(&mut self, event: &Event);
}

impl<F> EventListener for F
where
    F: FnMut(&Event) + Send + 'static,
{
    fn on_event(&mut self, event: &Event) {
        self(event)
    }
}

/// Cloneable publisher handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes to current subscribers. Without subscribers the event is dropped.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Feeds every event to `listener` on a background task until the bus
    /// is dropped or the task is aborted.
    pub fn attach<L: EventListener>(&self, mut listener: L) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => listener.on_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event listener lagged behind, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}
