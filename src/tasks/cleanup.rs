//! TTL Sweep Task
//!
//! Background task that periodically purges expired entries from one cache,
//! so memory held by entries nobody asks for again is returned without
//! waiting for the next write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::BoundedCache;
use crate::events::{Event, EventBus};

/// Spawns a task that sweeps `cache` every `interval` and publishes a
/// `CacheEvicted` event per purged entry.
///
/// The returned handle is aborted on engine teardown.
///
/// # Example
/// ```ignore
/// let pages = Arc::new(RwLock::new(BoundedCache::new(1 << 20, 64, None)));
/// let handle = spawn_sweep_task("pages", pages.clone(), Duration::from_secs(30), events);
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_sweep_task<V>(
    name: &'static str,
    cache: Arc<RwLock<BoundedCache<V>>>,
    interval: Duration,
    events: EventBus,
) -> JoinHandle<()>
where
    V: Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(cache = name, "Starting TTL sweep task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let purged = {
                let mut cache_guard = cache.write().await;
                cache_guard.purge_expired()
            };

            if purged.is_empty() {
                debug!(cache = name, "TTL sweep: no expired entries found");
                continue;
            }

            info!(cache = name, "TTL sweep: removed {} expired entries", purged.len());
            for eviction in purged {
                events.publish(Event::CacheEvicted {
                    cache: name.to_string(),
                    key: eviction.key,
                    reason: eviction.reason,
                });
            }
        }
    })
}
