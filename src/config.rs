//! Configuration Module
//!
//! Loads the permission layer configuration from environment variables.
//! Every value has a default, so an empty environment yields a working setup.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::BackoffConfig;
use crate::cache::{EvictionPolicy, ResourceClass};

/// Reads `name` and parses it, falling back to `default` when unset or invalid.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(name, default))
}

fn env_millis(name: &str, default: u64) -> Duration {
    Duration::from_millis(env_or(name, default))
}

// == Top-level Config ==
/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Base URL of the origin permission service
    pub origin_url: String,
    /// File backing the durable mirror
    pub store_path: PathBuf,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub resilience: ResilienceConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `ORIGIN_URL` - origin service base URL (default: http://127.0.0.1:8080)
    /// - `STORE_PATH` - durable mirror file (default: permcache-store.json)
    ///
    /// Section variables are documented on each section's `from_env`.
    pub fn from_env() -> Self {
        Self {
            server_port: env_or("SERVER_PORT", 3000),
            origin_url: env::var("ORIGIN_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            store_path: env::var("STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("permcache-store.json")),
            cache: CacheConfig::from_env(),
            sync: SyncConfig::from_env(),
            resilience: ResilienceConfig::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            origin_url: "http://127.0.0.1:8080".to_string(),
            store_path: PathBuf::from("permcache-store.json"),
            cache: CacheConfig::default(),
            sync: SyncConfig::default(),
            resilience: ResilienceConfig::default(),
        }
    }
}

// == Cache Config ==
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of in-memory entries
    pub max_entries: usize,
    pub eviction_policy: EvictionPolicy,
    pub role_ttl: Duration,
    pub menu_ttl: Duration,
    pub permission_ttl: Duration,
    /// Hard expiry of mirrored records
    pub mirror_ttl: Duration,
    /// Mirror every write, not only persistent ones
    pub mirror_writes: bool,
    /// Bumping this purges all previously mirrored records
    pub version: u32,
    pub cleanup_interval: Duration,
}

impl CacheConfig {
    /// # Environment Variables
    /// - `MAX_ENTRIES` (default: 1000)
    /// - `EVICTION_POLICY` - lru | lfu | priority (default: lru)
    /// - `ROLE_TTL_SECS` (default: 1800)
    /// - `MENU_TTL_SECS` (default: 600)
    /// - `PERMISSION_TTL_SECS` (default: 300)
    /// - `MIRROR_TTL_SECS` (default: 86400)
    /// - `MIRROR_WRITES` (default: true)
    /// - `CACHE_VERSION` (default: 1)
    /// - `CLEANUP_INTERVAL` - seconds (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            eviction_policy: env_or("EVICTION_POLICY", defaults.eviction_policy),
            role_ttl: env_secs("ROLE_TTL_SECS", defaults.role_ttl.as_secs()),
            menu_ttl: env_secs("MENU_TTL_SECS", defaults.menu_ttl.as_secs()),
            permission_ttl: env_secs("PERMISSION_TTL_SECS", defaults.permission_ttl.as_secs()),
            mirror_ttl: env_secs("MIRROR_TTL_SECS", defaults.mirror_ttl.as_secs()),
            mirror_writes: env_or("MIRROR_WRITES", defaults.mirror_writes),
            version: env_or("CACHE_VERSION", defaults.version),
            cleanup_interval: env_secs("CLEANUP_INTERVAL", defaults.cleanup_interval.as_secs()),
        }
    }

    /// TTL applied to entries of `class` when the writer gives none.
    pub fn ttl_for(&self, class: ResourceClass) -> Duration {
        match class {
            ResourceClass::Role => self.role_ttl,
            ResourceClass::Menu => self.menu_ttl,
            ResourceClass::Permission => self.permission_ttl,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            eviction_policy: EvictionPolicy::Lru,
            role_ttl: Duration::from_secs(30 * 60),
            menu_ttl: Duration::from_secs(10 * 60),
            permission_ttl: Duration::from_secs(5 * 60),
            mirror_ttl: Duration::from_secs(24 * 60 * 60),
            mirror_writes: true,
            version: 1,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

// == Sync Config ==
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Live channel endpoint; sync is disabled when unset
    pub url: Option<String>,
    /// Sent in the auth frame after connecting
    pub token: String,
    pub backoff: BackoffConfig,
    pub max_reconnect_attempts: u32,
    /// A connection still CONNECTING after this long is dropped
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reconcile_interval: Duration,
}

impl SyncConfig {
    /// # Environment Variables
    /// - `SYNC_URL` (default: unset)
    /// - `SYNC_TOKEN` (default: empty)
    /// - `RECONNECT_BASE_MS` (default: 1000)
    /// - `RECONNECT_MAX_MS` (default: 30000)
    /// - `RECONNECT_MULTIPLIER` (default: 2.0)
    /// - `RECONNECT_JITTER_MS` (default: 250)
    /// - `RECONNECT_MAX_ATTEMPTS` (default: 10)
    /// - `CONNECT_TIMEOUT_MS` (default: 10000)
    /// - `HEARTBEAT_INTERVAL_SECS` (default: 30)
    /// - `RECONCILE_INTERVAL_SECS` (default: 300)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env::var("SYNC_URL").ok().filter(|url| !url.is_empty()),
            token: env::var("SYNC_TOKEN").unwrap_or_default(),
            backoff: BackoffConfig {
                base: env_millis("RECONNECT_BASE_MS", 1_000),
                max: env_millis("RECONNECT_MAX_MS", 30_000),
                multiplier: env_or("RECONNECT_MULTIPLIER", 2.0),
                jitter: env_millis("RECONNECT_JITTER_MS", 250),
            },
            max_reconnect_attempts: env_or(
                "RECONNECT_MAX_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            connect_timeout: env_millis("CONNECT_TIMEOUT_MS", 10_000),
            heartbeat_interval: env_secs("HEARTBEAT_INTERVAL_SECS", 30),
            reconcile_interval: env_secs("RECONCILE_INTERVAL_SECS", 300),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: String::new(),
            backoff: BackoffConfig::default(),
            max_reconnect_attempts: 10,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(300),
        }
    }
}

// == Resilience Config ==
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Failures within `failure_window` that open the breaker
    pub failure_threshold: u32,
    pub failure_window: Duration,
    /// Time an open breaker waits before probing
    pub reset_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: BackoffConfig,
    pub origin_timeout: Duration,
    /// Deadline for the recovery health probe
    pub health_timeout: Duration,
    pub health_check_interval: Duration,
    pub retry_queue_capacity: usize,
    pub error_log_capacity: usize,
    /// `resource:action` pairs allowed when falling back to defaults
    pub default_allow: Vec<String>,
}

impl ResilienceConfig {
    /// # Environment Variables
    /// - `FAILURE_THRESHOLD` (default: 5)
    /// - `FAILURE_WINDOW_SECS` (default: 60)
    /// - `RESET_TIMEOUT_SECS` (default: 30)
    /// - `MAX_RETRIES` (default: 3)
    /// - `RETRY_BASE_MS` (default: 500)
    /// - `RETRY_MAX_MS` (default: 5000)
    /// - `ORIGIN_TIMEOUT_MS` (default: 5000)
    /// - `HEALTH_TIMEOUT_MS` (default: 2000)
    /// - `HEALTH_CHECK_INTERVAL_SECS` (default: 15)
    /// - `RETRY_QUEUE_CAPACITY` (default: 100)
    /// - `ERROR_LOG_CAPACITY` (default: 100)
    /// - `DEFAULT_ALLOW` - comma separated `resource:action` pairs (default: empty)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: env_or("FAILURE_THRESHOLD", defaults.failure_threshold),
            failure_window: env_secs("FAILURE_WINDOW_SECS", 60),
            reset_timeout: env_secs("RESET_TIMEOUT_SECS", 30),
            max_retries: env_or("MAX_RETRIES", defaults.max_retries),
            retry_backoff: BackoffConfig {
                base: env_millis("RETRY_BASE_MS", 500),
                max: env_millis("RETRY_MAX_MS", 5_000),
                ..defaults.retry_backoff
            },
            origin_timeout: env_millis("ORIGIN_TIMEOUT_MS", 5_000),
            health_timeout: env_millis("HEALTH_TIMEOUT_MS", 2_000),
            health_check_interval: env_secs("HEALTH_CHECK_INTERVAL_SECS", 15),
            retry_queue_capacity: env_or("RETRY_QUEUE_CAPACITY", defaults.retry_queue_capacity),
            error_log_capacity: env_or("ERROR_LOG_CAPACITY", defaults.error_log_capacity),
            default_allow: env::var("DEFAULT_ALLOW")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|pair| !pair.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: BackoffConfig {
                base: Duration::from_millis(500),
                max: Duration::from_millis(5_000),
                multiplier: 2.0,
                jitter: Duration::from_millis(100),
            },
            origin_timeout: Duration::from_millis(5_000),
            health_timeout: Duration::from_millis(2_000),
            health_check_interval: Duration::from_secs(15),
            retry_queue_capacity: 100,
            error_log_capacity: 100,
            default_allow: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.resilience.failure_threshold, 5);
        assert_eq!(config.resilience.reset_timeout, Duration::from_secs(30));
        assert!(config.sync.url.is_none());
    }

    #[test]
    fn test_ttl_for_class() {
        let cache = CacheConfig::default();
        assert!(cache.ttl_for(ResourceClass::Role) > cache.ttl_for(ResourceClass::Menu));
        assert!(cache.ttl_for(ResourceClass::Menu) > cache.ttl_for(ResourceClass::Permission));
    }

    #[test]
    fn test_config_from_env() {
        env::set_var("FAILURE_THRESHOLD", "7");
        env::set_var("EVICTION_POLICY", "lfu");
        env::set_var("DEFAULT_ALLOW", "dashboard:read, profile:read,");
        env::set_var("MAX_RETRIES", "not-a-number");

        let config = Config::from_env();
        assert_eq!(config.resilience.failure_threshold, 7);
        assert_eq!(config.cache.eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(
            config.resilience.default_allow,
            vec!["dashboard:read".to_string(), "profile:read".to_string()]
        );
        assert_eq!(config.resilience.max_retries, 3);

        env::remove_var("FAILURE_THRESHOLD");
        env::remove_var("EVICTION_POLICY");
        env::remove_var("DEFAULT_ALLOW");
        env::remove_var("MAX_RETRIES");
    }
}
