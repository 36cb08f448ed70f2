//! # Configuration Module
//!
//! Configuration for the metadata gateway. A configuration is built in three
//! steps, each of which can fail with [`GatewayError::Configuration`]:
//!
//! 1. parse a YAML or JSON file (or start from [`GatewayConfig::default`]),
//! 2. apply `GATEWAY_*` environment variable overrides,
//! 3. validate the result, collecting every problem into one error.
//!
//! The upstream credential is optional: a gateway without one
//! still starts and answers proxy requests with a 500.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::core::error::{GatewayError, GatewayResult};

/// Environment variables consulted, in order, for the upstream API key
pub const API_KEY_ENV_VARS: &[&str] = &["TMDB_API_KEY", "NEXT_PUBLIC_TMDB_API_KEY"];

/// Main gateway configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener settings
    pub server: ServerConfig,

    /// Upstream metadata API settings
    pub upstream: UpstreamConfig,

    /// Response cache settings
    pub cache: CacheConfig,

    /// Per-client rate limiting settings
    pub rate_limit: RateLimitConfig,

    /// Logging and metrics settings
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_json::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given (format picked by extension), otherwise from defaults.
    pub async fn load<P: AsRef<Path>>(path: Option<P>) -> GatewayResult<Self> {
        match path {
            Some(path) if path.as_ref().extension().and_then(|s| s.to_str()) == Some("json") => {
                Self::load_from_json(path).await
            }
            Some(path) => Self::load_from_file(path).await,
            None => {
                let mut config = Self::default();
                config.apply_env_overrides()?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: GATEWAY_<SECTION>_<FIELD>
    /// For example: GATEWAY_SERVER_PORT=8080
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup` instead of the process environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(port) = lookup("GATEWAY_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_PORT: {}", e)))?;
        }

        if let Some(url) = lookup("GATEWAY_UPSTREAM_BASE_URL") {
            self.upstream.base_url = url;
        }

        if let Some(timeout) = lookup("GATEWAY_UPSTREAM_TIMEOUT") {
            self.upstream.timeout = humantime::parse_duration(&timeout).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_UPSTREAM_TIMEOUT: {}", e))
            })?;
        }

        if let Some(key) = API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| lookup(*name))
            .find(|key| !key.trim().is_empty())
        {
            self.upstream.api_key = Some(key);
        }

        if let Some(ttl) = lookup("GATEWAY_CACHE_FRESH_TTL") {
            self.cache.fresh_ttl = humantime::parse_duration(&ttl).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_CACHE_FRESH_TTL: {}", e))
            })?;
        }

        if let Some(max) = lookup("GATEWAY_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = max.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_CACHE_MAX_ENTRIES: {}", e))
            })?;
        }

        if let Some(max) = lookup("GATEWAY_RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit.max_requests = max.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_RATE_LIMIT_MAX_REQUESTS: {}", e))
            })?;
        }

        if let Some(window) = lookup("GATEWAY_RATE_LIMIT_WINDOW") {
            self.rate_limit.window = humantime::parse_duration(&window).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_RATE_LIMIT_WINDOW: {}", e))
            })?;
        }

        if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
            self.observability.logging.level = level;
        }

        if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
            self.observability.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(GatewayError::config(format!(
                        "Invalid GATEWAY_LOG_FORMAT: {}",
                        other
                    )))
                }
            };
        }

        if let Some(enabled) = lookup("GATEWAY_METRICS_ENABLED") {
            self.observability.metrics.enabled = enabled.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_METRICS_ENABLED: {}", e))
            })?;
        }

        Ok(())
    }

    /// Configuration validation with every problem reported at once
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        } else if self.server.socket_addr().is_err() {
            errors.push(format!(
                "bind_address '{}' is not a valid IP address",
                self.server.bind_address
            ));
        }

        match Url::parse(&self.upstream.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(format!(
                "upstream base_url must use http or https, got '{}'",
                url.scheme()
            )),
            Err(e) => errors.push(format!(
                "upstream base_url '{}' is invalid: {}",
                self.upstream.base_url, e
            )),
        }

        if self.upstream.timeout.is_zero() {
            errors.push("upstream timeout must be greater than 0".to_string());
        }

        if self.upstream.passthrough_timeout.is_zero() {
            errors.push("upstream passthrough_timeout must be greater than 0".to_string());
        }

        if self.cache.namespace.is_empty() {
            errors.push("cache namespace cannot be empty".to_string());
        }

        if self.cache.fresh_ttl.is_zero() {
            errors.push("cache fresh_ttl must be greater than 0".to_string());
        }

        if self.cache.hard_ttl < self.cache.fresh_ttl {
            errors.push(format!(
                "cache hard_ttl ({}) must not be shorter than fresh_ttl ({})",
                humantime::format_duration(self.cache.hard_ttl),
                humantime::format_duration(self.cache.fresh_ttl)
            ));
        }

        if self.cache.fresh_ttl + self.cache.serve_stale_for > self.cache.hard_ttl {
            errors.push("cache serve_stale_for extends past hard_ttl".to_string());
        }

        if self.cache.max_entries == 0 {
            errors.push("cache max_entries must be greater than 0".to_string());
        }

        if self.cache.sweep_interval.is_zero() {
            errors.push("cache sweep_interval must be greater than 0".to_string());
        }

        if self.rate_limit.max_requests == 0 {
            errors.push("rate_limit max_requests must be greater than 0".to_string());
        }

        if self.rate_limit.window.is_zero() {
            errors.push("rate_limit window must be greater than 0".to_string());
        }

        if self.rate_limit.max_clients == 0 {
            errors.push("rate_limit max_clients must be greater than 0".to_string());
        }

        if self.rate_limit.sweep_interval.is_zero() {
            errors.push("rate_limit sweep_interval must be greater than 0".to_string());
        }

        if let Err(e) = EnvFilter::try_new(&self.observability.logging.level) {
            errors.push(format!(
                "Invalid log level '{}': {}",
                self.observability.logging.level, e
            ));
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// HTTP port
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> GatewayResult<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid bind address: {}", e)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Upstream metadata API configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL every endpoint is appended to
    pub base_url: String,

    /// Server-held API key appended as the `api_key` query parameter
    pub api_key: Option<String>,

    /// Bound on a proxied fetch, from send to fully read body
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Bound on a raw passthrough fetch
    #[serde(with = "humantime_serde")]
    pub passthrough_timeout: Duration,

    /// Open upstream connections over IPv4 only
    pub prefer_ipv4: bool,
}

impl UpstreamConfig {
    /// The configured key, if it is non-blank
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

// Hand-written so the key never shows up in logs
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("passthrough_timeout", &self.passthrough_timeout)
            .field("prefer_ipv4", &self.prefer_ipv4)
            .finish()
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.themoviedb.org/3".to_string(),
            api_key: None,
            timeout: Duration::from_secs(20),
            passthrough_timeout: Duration::from_secs(15),
            prefer_ipv4: true,
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix of every cache key
    pub namespace: String,

    /// How long an entry is served as a plain hit
    #[serde(with = "humantime_serde")]
    pub fresh_ttl: Duration,

    /// How long an entry is kept for stale-if-error fallback
    #[serde(with = "humantime_serde")]
    pub hard_ttl: Duration,

    /// How long past `fresh_ttl` an entry is still served on the normal path (0 disables)
    #[serde(with = "humantime_serde")]
    pub serve_stale_for: Duration,

    /// Maximum number of entries before least-recently-used eviction
    pub max_entries: usize,

    /// Interval of the background sweep for hard-expired entries
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "tmdb".to_string(),
            fresh_ttl: Duration::from_secs(10 * 60),
            hard_ttl: Duration::from_secs(24 * 60 * 60),
            serve_stale_for: Duration::ZERO,
            max_entries: 500,
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Fixed-window rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per client per window
    pub max_requests: u32,

    /// Window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Maximum number of tracked client windows
    pub max_clients: usize,

    /// Interval of the background sweep for elapsed windows
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 300,
            window: Duration::from_secs(60),
            max_clients: 10_000,
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter; `RUST_LOG` takes precedence when set
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install a Prometheus recorder and expose `/metrics`
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
