//! Render Core - bounded caching and concurrent task scheduling for a
//! document-rendering engine
//!
//! Decoded documents, pages and rasters live in size- and count-bounded
//! LRU caches with TTL expiry. Decode and render work runs on a capped pool
//! of isolated execution units, ordered by priority, with retries and
//! per-attempt timeouts.

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod scheduler;
pub mod tasks;
pub mod worker;

pub use api::AppState;
pub use cache::BoundedCache;
pub use config::{CacheConfig, EngineConfig, SchedulerConfig};
pub use engine::{Engine, SyntheticBackend};
pub use error::{CacheError, EngineError, PoolError, TaskError};
pub use events::{Event, EventBus, EventListener};
pub use scheduler::{Priority, ResultHandle, TaskScheduler};
pub use tasks::{spawn_idle_reaper, spawn_sweep_task};
pub use worker::{TaskHandler, WorkerPool};
