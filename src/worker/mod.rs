//! Worker Module
//!
//! Isolated execution units and the capped pool that owns them.
//!
//! A unit is a dedicated OS thread that shares no mutable state with its
//! caller. All interaction goes through `UnitRequest`/`UnitResponse`
//! messages, starting with a ready handshake when the unit is spawned.

mod pool;
mod protocol;
mod unit;

pub use pool::{PoolConfig, PoolStats, WorkerPool};
pub use protocol::{message_id, Outcome, UnitMessage, UnitRequest, UnitResponse};
pub use unit::{AttemptOutcome, ExecutionUnit, TaskHandler};
