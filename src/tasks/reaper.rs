//! Idle Unit Reaper Task
//!
//! Background task that terminates execution units left idle past the
//! pool's `idle_timeout`, shrinking the pool back towards `min_workers`
//! after a burst of work.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::worker::WorkerPool;

/// Longest pause between two idle checks.
pub const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(10);
/// Shortest pause between two idle checks.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Spawns a task that calls [`WorkerPool::reap_idle`] every `interval`.
///
/// The task ends on its own once the pool is shut down.
pub fn spawn_idle_reaper(pool: Arc<WorkerPool>, interval: Duration) -> JoinHandle<()> {
    let interval = interval.max(MIN_CHECK_INTERVAL);
    tokio::spawn(async move {
        info!("Starting idle unit reaper with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;
            if pool.is_closed() {
                debug!("Worker pool closed, stopping idle reaper");
                break;
            }
            pool.reap_idle();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{PoolConfig, TaskHandler};
    use serde_json::Value;

    fn pool(idle_timeout: Duration) -> Arc<WorkerPool> {
        let config = PoolConfig {
            max_workers: 2,
            idle_timeout: Some(idle_timeout),
            ..PoolConfig::default()
        };
        let handler: Arc<dyn TaskHandler> =
            Arc::new(|_: &str, _: &Value| Ok::<_, String>(Value::Null));
        Arc::new(WorkerPool::new(config, handler))
    }

    #[tokio::test]
    async fn test_reaper_terminates_idle_units() {
        let pool = pool(Duration::from_millis(30));
        let unit = pool.acquire().await.unwrap();
        pool.release(unit);

        let handle = spawn_idle_reaper(Arc::clone(&pool), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.total_destroyed, 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_reaper_stops_after_shutdown() {
        let pool = pool(Duration::from_secs(60));
        let handle = spawn_idle_reaper(Arc::clone(&pool), Duration::from_millis(10));

        pool.shutdown();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Reaper should exit once the pool is closed");
    }
}
