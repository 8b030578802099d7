//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the engine is alive.
//!
//! # Tasks
//! - TTL Sweep: purges expired entries from each engine cache
//! - Idle Reaper: terminates execution units idle past their timeout

mod cleanup;
mod reaper;

pub use cleanup::spawn_sweep_task;
pub use reaper::{spawn_idle_reaper, IDLE_CHECK_INTERVAL};
