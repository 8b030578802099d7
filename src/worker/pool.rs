//! Capped pool of execution units with a FIFO waiting queue.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::PoolError;
use crate::worker::unit::{ExecutionUnit, TaskHandler};

/// Pool sizing and unit lifecycle policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Hard cap on live units
    pub max_workers: usize,
    /// Units created by `warm_up` and kept alive by `reap_idle`
    pub min_workers: usize,
    /// How long a new unit may take to announce it is ready
    pub handshake_timeout: Duration,
    /// Idle time after which `reap_idle` terminates a unit, None = never
    pub idle_timeout: Option<Duration>,
    /// Consecutive failed attempts after which a unit is replaced, 0 = never
    pub max_unit_failures: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            min_workers: 0,
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(60)),
            max_unit_failures: 3,
        }
    }
}

/// Pool occupancy and lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_created: u64,
    pub total_destroyed: u64,
    /// Units retired after too many consecutive failures
    pub total_replaced: u64,
    /// Attempts that succeeded, across every unit
    pub completed_attempts: u64,
    /// Attempts that failed or timed out, across every unit
    pub failed_attempts: u64,
    pub idle: usize,
    pub busy: usize,
    /// Requesters parked in `acquire`
    pub waiting: usize,
    /// Highest number of live units seen
    pub peak: usize,
    pub min_workers: usize,
    pub max_workers: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<ExecutionUnit>,
    /// Ids of units handed out and not yet released or removed
    busy: HashSet<String>,
    waiters: VecDeque<oneshot::Sender<ExecutionUnit>>,
    /// Idle + busy + being spawned
    live: usize,
    min_workers: usize,
    max_workers: usize,
    created: u64,
    destroyed: u64,
    replaced: u64,
    completed_attempts: u64,
    failed_attempts: u64,
    peak: usize,
    closed: bool,
}

impl PoolState {
    fn take_idle(&mut self) -> Option<ExecutionUnit> {
        let unit = self.idle.pop_front()?;
        self.busy.insert(unit.id().to_string());
        Some(unit)
    }

    /// Drops a unit from the books. Returns false if it was not tracked,
    /// which happens after a shutdown already accounted for it.
    fn forget(&mut self, unit_id: &str) -> bool {
        let tracked = self.busy.remove(unit_id) || {
            let before = self.idle.len();
            self.idle.retain(|unit| unit.id() != unit_id);
            self.idle.len() != before
        };
        if tracked {
            self.live -= 1;
            self.destroyed += 1;
        }
        tracked
    }

    /// Claims a spawn slot if the pool is open and below its cap.
    fn reserve_spawn(&mut self) -> bool {
        if self.closed || self.live >= self.max_workers {
            return false;
        }
        self.live += 1;
        true
    }
}

enum Slot {
    Ready(ExecutionUnit),
    Spawn,
    Wait(oneshot::Receiver<ExecutionUnit>),
    Full,
}

// == Worker Pool ==
/// Owns the lifecycle of every execution unit.
///
/// Units are created on demand up to `max_workers`. Once the cap is reached,
/// `acquire` callers queue in FIFO order and are served directly by
/// `release`, ahead of the idle set.
pub struct WorkerPool {
    config: PoolConfig,
    handler: Arc<dyn TaskHandler>,
    state: Mutex<PoolState>,
    next_unit: AtomicU64,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(config: PoolConfig, handler: Arc<dyn TaskHandler>) -> Self {
        let (min_workers, max_workers) = clamp_limits(config.min_workers, config.max_workers);
        let state = PoolState {
            min_workers,
            max_workers,
            ..PoolState::default()
        };
        Self {
            config,
            handler,
            state: Mutex::new(state),
            next_unit: AtomicU64::new(1),
        }
    }

    /// Settings the pool was created with. Limits changed by `resize` are
    /// reported by `stats`.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    // == Acquire ==
    /// Returns a unit, waiting in line if the pool is at capacity.
    ///
    /// Dropping the returned future gives up the place in line.
    pub async fn acquire(&self) -> Result<ExecutionUnit, PoolError> {
        match self.reserve(true)? {
            Slot::Ready(unit) => Ok(unit),
            Slot::Spawn => self.spawn_reserved().await,
            Slot::Wait(rx) => rx.await.map_err(|_| PoolError::Closed),
            Slot::Full => unreachable!("waiting reservation never reports full"),
        }
    }

    /// Returns an idle or newly created unit, or None when the pool is at
    /// capacity. Never queues.
    pub async fn try_acquire(&self) -> Result<Option<ExecutionUnit>, PoolError> {
        match self.reserve(false)? {
            Slot::Ready(unit) => Ok(Some(unit)),
            Slot::Spawn => self.spawn_reserved().await.map(Some),
            Slot::Full | Slot::Wait(_) => Ok(None),
        }
    }

    fn reserve(&self, wait: bool) -> Result<Slot, PoolError> {
        let mut state = self.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if let Some(unit) = state.take_idle() {
            return Ok(Slot::Ready(unit));
        }
        if state.reserve_spawn() {
            return Ok(Slot::Spawn);
        }
        if !wait {
            return Ok(Slot::Full);
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        debug!(waiting = state.waiters.len(), "Worker pool exhausted, queueing requester");
        Ok(Slot::Wait(rx))
    }

    /// Creates a unit for a slot already counted in `live`.
    async fn spawn_reserved(&self) -> Result<ExecutionUnit, PoolError> {
        let id = format!("unit-{}", self.next_unit.fetch_add(1, Ordering::Relaxed));
        let spawned = match ExecutionUnit::spawn(id, Arc::clone(&self.handler)) {
            Ok(mut unit) => match unit.handshake(self.config.handshake_timeout).await {
                Ok(()) => Ok(unit),
                Err(e) => {
                    unit.terminate();
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        let mut state = self.lock();
        match spawned {
            Ok(unit) if !state.closed => {
                state.created += 1;
                state.peak = state.peak.max(state.live);
                state.busy.insert(unit.id().to_string());
                debug!(unit = %unit.id(), live = state.live, "Execution unit ready");
                Ok(unit)
            }
            Ok(unit) => {
                state.live -= 1;
                state.created += 1;
                state.destroyed += 1;
                drop(state);
                unit.terminate();
                Err(PoolError::Closed)
            }
            Err(e) => {
                state.live -= 1;
                warn!("Failed to start execution unit: {}", e);
                Err(e)
            }
        }
    }

    /// Spawns a unit for a reserved slot and hands it to the pool.
    async fn spawn_into_pool(&self) {
        match self.spawn_reserved().await {
            Ok(unit) => self.release(unit),
            Err(e) => warn!("Could not replace execution unit: {}", e),
        }
    }

    // == Release ==
    /// Returns a unit to the pool, handing it straight to the oldest waiter
    /// if there is one.
    ///
    /// A unit released while the pool holds more units than its cap allows,
    /// after a shrinking `resize`, is terminated instead.
    pub fn release(&self, mut unit: ExecutionUnit) {
        unit.unbind();
        let mut state = self.lock();

        if state.closed || state.live > state.max_workers {
            state.forget(unit.id());
            drop(state);
            unit.terminate();
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(unit) {
                Ok(()) => return,
                // Requester gave up; try the next one
                Err(returned) => unit = returned,
            }
        }

        state.busy.remove(unit.id());
        state.idle.push_back(unit);
    }

    // == Recycle ==
    /// Records how an attempt on `unit` ended and returns it to the pool.
    ///
    /// A unit that reached `max_unit_failures` consecutive failures is
    /// terminated and replaced by a fresh one instead.
    pub async fn recycle(&self, mut unit: ExecutionUnit, success: bool) {
        unit.record(success);
        {
            let mut state = self.lock();
            if success {
                state.completed_attempts += 1;
            } else {
                state.failed_attempts += 1;
            }
        }

        let limit = self.config.max_unit_failures;
        if limit == 0 || unit.consecutive_failures() < limit {
            self.release(unit);
            return;
        }

        warn!(
            unit = %unit.id(),
            failures = unit.consecutive_failures(),
            "Execution unit keeps failing, replacing it"
        );
        let respawn = {
            let mut state = self.lock();
            if state.forget(unit.id()) {
                state.replaced += 1;
            }
            state.reserve_spawn()
        };
        unit.terminate();
        if respawn {
            self.spawn_into_pool().await;
        }
    }

    // == Remove ==
    /// Terminates a unit and purges it from the pool.
    ///
    /// If requesters are waiting, a replacement is spawned for the oldest.
    pub async fn remove(&self, unit: ExecutionUnit) {
        let respawn = {
            let mut state = self.lock();
            state.forget(unit.id());
            !state.waiters.is_empty() && state.reserve_spawn()
        };
        info!(unit = %unit.id(), "Removing execution unit from pool");
        unit.terminate();

        if respawn {
            self.spawn_into_pool().await;
        }
    }

    /// Terminates an idle unit by id. Returns false if no idle unit has that id.
    pub fn remove_idle(&self, unit_id: &str) -> bool {
        let unit = {
            let mut state = self.lock();
            let Some(pos) = state.idle.iter().position(|unit| unit.id() == unit_id) else {
                return false;
            };
            let unit = state.idle.remove(pos);
            state.live -= 1;
            state.destroyed += 1;
            unit
        };
        if let Some(unit) = unit {
            unit.terminate();
        }
        true
    }

    // == Reap Idle ==
    /// Terminates units idle for longer than `idle_timeout`, oldest first,
    /// without going below `min_workers`. Returns how many were terminated.
    pub fn reap_idle(&self) -> usize {
        let Some(timeout) = self.config.idle_timeout else {
            return 0;
        };
        let expired: Vec<String> = {
            let state = self.lock();
            let spare = state.live.saturating_sub(state.min_workers);
            state
                .idle
                .iter()
                .filter(|unit| unit.idle_for() >= timeout)
                .take(spare)
                .map(|unit| unit.id().to_string())
                .collect()
        };

        let reaped = expired.iter().filter(|id| self.remove_idle(id)).count();
        if reaped > 0 {
            info!(reaped, "Terminated idle execution units");
        }
        reaped
    }

    // == Warm Up ==
    /// Spawns idle units until `min_workers` are live.
    pub async fn warm_up(&self) -> Result<usize, PoolError> {
        let mut spawned = 0;
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if state.live >= state.min_workers {
                    break;
                }
                state.live += 1;
            }
            let unit = self.spawn_reserved().await?;
            self.release(unit);
            spawned += 1;
        }
        Ok(spawned)
    }

    // == Resize ==
    /// Changes the pool limits at runtime.
    ///
    /// Surplus idle units are terminated at once and surplus busy units when
    /// they are released. Growing the cap serves parked requesters, then
    /// `min_workers` is restored.
    pub async fn resize(&self, min_workers: usize, max_workers: usize) -> Result<(), PoolError> {
        let (min_workers, max_workers) = clamp_limits(min_workers, max_workers);
        let (surplus, to_spawn) = {
            let mut state = self.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            state.min_workers = min_workers;
            state.max_workers = max_workers;

            let excess = state.live.saturating_sub(max_workers).min(state.idle.len());
            let surplus: Vec<ExecutionUnit> = state.idle.drain(..excess).collect();
            state.live -= surplus.len();
            state.destroyed += surplus.len() as u64;

            let mut to_spawn = 0;
            while to_spawn < state.waiters.len() && state.reserve_spawn() {
                to_spawn += 1;
            }
            (surplus, to_spawn)
        };

        info!(
            min_workers,
            max_workers,
            terminated = surplus.len(),
            "Worker pool resized"
        );
        for unit in surplus {
            unit.terminate();
        }
        for _ in 0..to_spawn {
            self.spawn_into_pool().await;
        }
        self.warm_up().await.map(|_| ())
    }

    // == Shutdown ==
    /// Closes the pool: idle units are terminated, waiters fail with
    /// `PoolError::Closed`, and busy units are written off. Busy units are
    /// disconnected when their current holder drops, releases or removes them.
    pub fn shutdown(&self) {
        let idle: Vec<ExecutionUnit> = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.waiters.clear();

            let idle: Vec<ExecutionUnit> = state.idle.drain(..).collect();
            let written_off = idle.len() + state.busy.len();
            state.busy.clear();
            state.live -= written_off;
            state.destroyed += written_off as u64;
            idle
        };

        let count = idle.len();
        for unit in idle {
            unit.terminate();
        }
        info!(terminated = count, "Worker pool shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // == Stats ==
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            total_created: state.created,
            total_destroyed: state.destroyed,
            total_replaced: state.replaced,
            completed_attempts: state.completed_attempts,
            failed_attempts: state.failed_attempts,
            idle: state.idle.len(),
            busy: state.busy.len(),
            waiting: state.waiters.len(),
            peak: state.peak,
            min_workers: state.min_workers,
            max_workers: state.max_workers,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// At least one unit, and no more pre-spawned units than the cap.
fn clamp_limits(min_workers: usize, max_workers: usize) -> (usize, usize) {
    let max_workers = max_workers.max(1);
    (min_workers.min(max_workers), max_workers)
}
