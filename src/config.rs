//! Configuration Module
//!
//! Explicit configuration structs for the caches, the scheduler and the
//! engine. Values can be loaded from `RENDER_*` environment variables with
//! sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::worker::PoolConfig;

/// Limits for one `BoundedCache` instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum total size of live entries, in bytes
    pub max_size: usize,
    /// Maximum number of live entries
    pub max_items: usize,
    /// Default time-to-live, None = entries never expire
    pub ttl: Option<Duration>,
}

impl CacheConfig {
    pub fn new(max_size: usize, max_items: usize, ttl: Option<Duration>) -> Self {
        Self {
            max_size,
            max_items,
            ttl,
        }
    }

    /// Loads a cache config from `{prefix}_MAX_BYTES`, `{prefix}_MAX_ITEMS`
    /// and `{prefix}_TTL_SECS` (0 disables expiry), falling back to `defaults`.
    pub fn from_env(prefix: &str, defaults: CacheConfig) -> Self {
        let ttl_secs: u64 = env_or(
            &format!("{prefix}_TTL_SECS"),
            defaults.ttl.map_or(0, |ttl| ttl.as_secs()),
        );
        Self {
            max_size: env_or(&format!("{prefix}_MAX_BYTES"), defaults.max_size),
            max_items: env_or(&format!("{prefix}_MAX_ITEMS"), defaults.max_items),
            ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
        }
    }
}

/// Worker pool and retry/timeout settings for the task scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Hard cap on live execution units
    pub max_workers: usize,
    /// Units spawned eagerly when the scheduler starts
    pub min_workers: usize,
    /// Deadline for a single attempt
    pub task_timeout: Duration,
    /// Additional attempts after the first one fails
    pub max_retries: u32,
    /// Deadline for a new unit to announce it is ready
    pub handshake_timeout: Duration,
    /// Idle units above `min_workers` are terminated after this long
    pub idle_timeout: Option<Duration>,
    /// A unit is replaced after this many consecutive failed attempts
    pub max_unit_failures: u32,
}

impl SchedulerConfig {
    /// Total attempts a task gets, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Pool settings derived from this config.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_workers: self.max_workers.max(1),
            min_workers: self.min_workers.min(self.max_workers.max(1)),
            handshake_timeout: self.handshake_timeout,
            idle_timeout: self.idle_timeout,
            max_unit_failures: self.max_unit_failures,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            min_workers: 0,
            task_timeout: Duration::from_secs(30),
            max_retries: 3,
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(60)),
            max_unit_failures: 3,
        }
    }
}

/// Engine configuration parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Decoded document cache
    pub documents: CacheConfig,
    /// Decoded page cache
    pub pages: CacheConfig,
    /// Rendered raster cache
    pub renders: CacheConfig,
    /// Render job scheduling
    pub scheduler: SchedulerConfig,
    /// HTTP server port
    pub server_port: u16,
    /// Interval between background TTL sweeps, zero disables them
    pub sweep_interval: Duration,
    /// Pages on each side of the current page rendered by `preload`
    pub preload_distance: usize,
}

impl EngineConfig {
    /// Creates a new EngineConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `RENDER_DOC_CACHE_{MAX_BYTES,MAX_ITEMS,TTL_SECS}` - Document cache
    /// - `RENDER_PAGE_CACHE_{MAX_BYTES,MAX_ITEMS,TTL_SECS}` - Page cache
    /// - `RENDER_RASTER_CACHE_{MAX_BYTES,MAX_ITEMS,TTL_SECS}` - Render cache
    /// - `RENDER_MAX_WORKERS` - Execution unit cap (default: available cores)
    /// - `RENDER_MIN_WORKERS` - Pre-spawned units (default: 0)
    /// - `RENDER_TASK_TIMEOUT_MS` - Per-attempt deadline (default: 30000)
    /// - `RENDER_MAX_RETRIES` - Retries after the first attempt (default: 3)
    /// - `RENDER_IDLE_TIMEOUT_SECS` - Idle unit lifetime, 0 keeps units (default: 60)
    /// - `RENDER_MAX_UNIT_FAILURES` - Failure streak that replaces a unit (default: 3)
    /// - `RENDER_SERVER_PORT` - HTTP server port (default: 3000)
    /// - `RENDER_SWEEP_INTERVAL_SECS` - TTL sweep frequency (default: 30)
    /// - `RENDER_PRELOAD_DISTANCE` - Preload radius in pages (default: 2)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let idle_secs: u64 = env_or(
            "RENDER_IDLE_TIMEOUT_SECS",
            defaults.scheduler.idle_timeout.map_or(0, |t| t.as_secs()),
        );
        let scheduler = SchedulerConfig {
            max_workers: env_or("RENDER_MAX_WORKERS", defaults.scheduler.max_workers),
            min_workers: env_or("RENDER_MIN_WORKERS", defaults.scheduler.min_workers),
            task_timeout: Duration::from_millis(env_or(
                "RENDER_TASK_TIMEOUT_MS",
                defaults.scheduler.task_timeout.as_millis() as u64,
            )),
            max_retries: env_or("RENDER_MAX_RETRIES", defaults.scheduler.max_retries),
            handshake_timeout: defaults.scheduler.handshake_timeout,
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            max_unit_failures: env_or(
                "RENDER_MAX_UNIT_FAILURES",
                defaults.scheduler.max_unit_failures,
            ),
        };

        Self {
            documents: CacheConfig::from_env("RENDER_DOC_CACHE", defaults.documents),
            pages: CacheConfig::from_env("RENDER_PAGE_CACHE", defaults.pages),
            renders: CacheConfig::from_env("RENDER_RASTER_CACHE", defaults.renders),
            scheduler,
            server_port: env_or("RENDER_SERVER_PORT", defaults.server_port),
            sweep_interval: Duration::from_secs(env_or(
                "RENDER_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )),
            preload_distance: env_or("RENDER_PRELOAD_DISTANCE", defaults.preload_distance),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            documents: CacheConfig::new(64 * 1024 * 1024, 32, Some(Duration::from_secs(30 * 60))),
            pages: CacheConfig::new(32 * 1024 * 1024, 256, Some(Duration::from_secs(10 * 60))),
            renders: CacheConfig::new(100 * 1024 * 1024, 64, Some(Duration::from_secs(10 * 60))),
            scheduler: SchedulerConfig::default(),
            server_port: 3000,
            sweep_interval: Duration::from_secs(30),
            preload_distance: 2,
        }
    }
}

/// Reads and parses an environment variable, falling back to `default`
/// when it is unset or malformed.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.renders.max_size, 100 * 1024 * 1024);
        assert_eq!(config.pages.ttl, Some(Duration::from_secs(600)));
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.scheduler.max_attempts(), 4);
        assert_eq!(config.scheduler.idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.scheduler.max_unit_failures, 3);
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.preload_distance, 2);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("RENDER_SERVER_PORT");
        env::remove_var("RENDER_MAX_RETRIES");
        env::remove_var("RENDER_PAGE_CACHE_MAX_ITEMS");

        let config = EngineConfig::from_env();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.pages.max_items, 256);
    }

    #[test]
    fn test_cache_config_from_env_zero_ttl_disables_expiry() {
        env::set_var("RENDER_TEST_CACHE_TTL_SECS", "0");
        env::set_var("RENDER_TEST_CACHE_MAX_ITEMS", "7");

        let config = CacheConfig::from_env(
            "RENDER_TEST_CACHE",
            CacheConfig::new(1024, 10, Some(Duration::from_secs(5))),
        );
        assert_eq!(config.ttl, None);
        assert_eq!(config.max_items, 7);
        assert_eq!(config.max_size, 1024);

        env::remove_var("RENDER_TEST_CACHE_TTL_SECS");
        env::remove_var("RENDER_TEST_CACHE_MAX_ITEMS");
    }

    #[test]
    fn test_pool_config_clamps_workers() {
        let config = SchedulerConfig {
            max_workers: 0,
            min_workers: 5,
            ..SchedulerConfig::default()
        };
        let pool = config.pool_config();
        assert_eq!(pool.max_workers, 1);
        assert_eq!(pool.min_workers, 1);
        assert_eq!(pool.max_unit_failures, config.max_unit_failures);
    }
}
