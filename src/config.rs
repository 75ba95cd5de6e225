use std::net::SocketAddr;
use std::time::Duration;

use crate::blocking::BlockingMode;
use crate::cache::CacheConfig;
use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct DnsConfig {
    /// Address to bind the DNS listener to.
    pub bind_addr: SocketAddr,

    /// Upstream DNS server to forward queries to.
    pub upstream_server: SocketAddr,

    /// Deadline for upstream queries and background refreshes.
    pub upstream_timeout: Duration,

    /// Whether to filter queries against the blocklist.
    pub blocking_enabled: bool,

    /// Path to an AdBlock-format blocklist file (None = empty filter).
    pub blocklist_path: Option<String>,

    /// How blocked queries are answered.
    pub blocking_mode: BlockingMode,

    /// Number of worker threads for the Tokio runtime (0 = default).
    pub worker_threads: usize,

    /// Cadence of the statistics summary log.
    pub stats_log_interval: Duration,

    /// Cache tuning parameters.
    pub cache_config: CacheConfig,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5353"
                .parse()
                .expect("Default bind address is valid"),
            upstream_server: "1.1.1.1:53".parse().expect("Cloudflare DNS is valid"),
            upstream_timeout: Duration::from_secs(5),
            blocking_enabled: true,
            blocklist_path: None,
            blocking_mode: BlockingMode::NxDomain,
            worker_threads: 0, // 0 = use Tokio default (number of CPU cores)
            stats_log_interval: Duration::from_secs(60),
            cache_config: CacheConfig::default(),
        }
    }
}

impl DnsConfig {
    /// Create a DnsConfig from environment variables.
    /// Returns Err if critical configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(bind_addr) = std::env::var("VORDR_BIND_ADDR") {
            config.bind_addr = bind_addr
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddress(bind_addr))?;
        }

        if let Ok(upstream) = std::env::var("VORDR_UPSTREAM_SERVER") {
            config.upstream_server = upstream
                .parse()
                .map_err(|_| ConfigError::InvalidUpstreamServer(upstream))?;
        }

        if let Ok(timeout_str) = std::env::var("VORDR_UPSTREAM_TIMEOUT") {
            let timeout_secs = timeout_str
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidTimeout(timeout_str.clone()))?;
            if timeout_secs == 0 {
                return Err(ConfigError::InvalidTimeout(
                    "Timeout must be greater than 0".to_string(),
                ));
            }
            config.upstream_timeout = Duration::from_secs(timeout_secs);
        }

        if let Ok(blocking_enabled) = std::env::var("VORDR_BLOCKING_ENABLED") {
            config.blocking_enabled = parse_bool(&blocking_enabled, true);
        }

        if let Ok(blocklist_path) = std::env::var("VORDR_BLOCKLIST_PATH") {
            if !blocklist_path.is_empty() {
                config.blocklist_path = Some(blocklist_path);
            }
        }

        if let Ok(mode) = std::env::var("VORDR_BLOCKING_MODE") {
            config.blocking_mode = BlockingMode::parse_str(&mode);
        }

        if let Ok(worker_threads) = std::env::var("VORDR_WORKER_THREADS") {
            config.worker_threads = worker_threads
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidWorkerThreads(worker_threads))?;
        }

        if let Ok(interval) = std::env::var("VORDR_STATS_LOG_INTERVAL") {
            let secs = interval.parse::<u64>().map_err(|_| {
                ConfigError::ParseError(format!("Invalid stats log interval: {}", interval))
            })?;
            config.stats_log_interval = Duration::from_secs(secs);
        }

        if let Ok(max_cache_size) = std::env::var("VORDR_MAX_CACHE_SIZE") {
            let size = max_cache_size
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidCacheSize(max_cache_size.clone()))?;
            if size == 0 {
                return Err(ConfigError::InvalidCacheSize(
                    "Cache size must be greater than 0".to_string(),
                ));
            }
            config.cache_config.max_size = size;
        }

        if let Ok(grace) = std::env::var("VORDR_GRACE_PERIOD") {
            let secs = grace
                .parse::<u64>()
                .map_err(|_| ConfigError::ParseError(format!("Invalid grace period: {}", grace)))?;
            config.cache_config.grace_period = Duration::from_secs(secs);
        }

        if let Ok(threshold) = std::env::var("VORDR_POPULARITY_THRESHOLD") {
            config.cache_config.popularity_threshold = threshold.parse::<u64>().map_err(|_| {
                ConfigError::ParseError(format!("Invalid popularity threshold: {}", threshold))
            })?;
        }

        if let Ok(fraction) = std::env::var("VORDR_PREFETCH_THRESHOLD") {
            let value = fraction.parse::<f64>().map_err(|_| {
                ConfigError::ParseError(format!("Invalid prefetch threshold: {}", fraction))
            })?;
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ParseError(
                    "Prefetch threshold must be between 0 and 1".to_string(),
                ));
            }
            config.cache_config.prefetch_threshold = value;
        }

        if let Ok(interval) = std::env::var("VORDR_SWEEP_INTERVAL") {
            let secs = interval.parse::<u64>().map_err(|_| {
                ConfigError::ParseError(format!("Invalid sweep interval: {}", interval))
            })?;
            if secs == 0 {
                return Err(ConfigError::ParseError(
                    "Sweep interval must be greater than 0".to_string(),
                ));
            }
            config.cache_config.sweep_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

/// Parse a boolean environment value, accepting the usual spellings.
fn parse_bool(value: &str, default: bool) -> bool {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DnsConfig::default();

        assert_eq!(config.bind_addr.port(), 5353);
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
        assert!(config.blocking_enabled);
        assert_eq!(config.blocking_mode, BlockingMode::NxDomain);
        assert_eq!(config.cache_config.max_size, 10_000);
        assert_eq!(config.cache_config.grace_period, Duration::from_secs(300));
        assert_eq!(config.cache_config.popularity_threshold, 5);
        assert!((config.cache_config.prefetch_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("true", false));
        assert!(parse_bool("1", false));
        assert!(parse_bool("YES", false));
        assert!(!parse_bool("false", true));
        assert!(!parse_bool("0", true));
        assert!(!parse_bool("off", true));
        assert!(parse_bool("gibberish", true));
        assert!(!parse_bool("gibberish", false));
    }

    #[test]
    fn from_env_applies_overrides() {
        // Single combined test: env vars are process-global and tests run
        // in parallel threads.
        std::env::set_var("VORDR_BIND_ADDR", "127.0.0.1:9953");
        std::env::set_var("VORDR_BLOCKING_MODE", "null");
        std::env::set_var("VORDR_MAX_CACHE_SIZE", "123");
        std::env::set_var("VORDR_GRACE_PERIOD", "42");

        let config = DnsConfig::from_env().unwrap();

        std::env::remove_var("VORDR_BIND_ADDR");
        std::env::remove_var("VORDR_BLOCKING_MODE");
        std::env::remove_var("VORDR_MAX_CACHE_SIZE");
        std::env::remove_var("VORDR_GRACE_PERIOD");

        assert_eq!(config.bind_addr.port(), 9953);
        assert_eq!(config.blocking_mode, BlockingMode::NullIp);
        assert_eq!(config.cache_config.max_size, 123);
        assert_eq!(config.cache_config.grace_period, Duration::from_secs(42));
    }
}
