//! Configuration management for calendar-sync
//!
//! This module handles loading, parsing, and validating engine configuration
//! from YAML files and environment variables. Keys are snake_case; the
//! camelCase spellings used by the hosting application are accepted as aliases.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Fingerprint disguise configuration
    #[serde(default)]
    pub stealth: StealthConfig,

    /// Proxy pool configuration
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Scraping behavior (concurrency, pacing, retries)
    #[serde(default)]
    pub scraping: ScrapingConfig,

    /// Per-platform adapter options
    #[serde(default)]
    pub platforms: PlatformsConfig,

    /// Sync loop cadence
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix CALENDAR_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(enabled) = env_parse::<bool>("CALENDAR_SYNC_STEALTH_ENABLED")? {
            config.stealth.enabled = enabled;
        }

        if let Some(residential) = env_parse::<bool>("CALENDAR_SYNC_PROXY_RESIDENTIAL_ONLY")? {
            config.proxy.residential_only = residential;
        }
        if let Some(rate) = env_parse::<f64>("CALENDAR_SYNC_PROXY_MIN_SUCCESS_RATE")? {
            config.proxy.min_success_rate = rate;
        }
        if let Some(mins) = env_parse::<u64>("CALENDAR_SYNC_PROXY_ROTATION_INTERVAL")? {
            config.proxy.rotation_interval_mins = mins;
        }
        // Comma-separated list; each entry is `url` or `kind=url`
        if let Ok(list) = std::env::var("CALENDAR_SYNC_PROXY_IDENTITIES") {
            config.proxy.identities = parse_identity_list(&list)?;
        }

        if let Some(n) = env_parse::<usize>("CALENDAR_SYNC_SCRAPING_MAX_CONCURRENCY")? {
            config.scraping.max_concurrency = n;
        }
        if let Some(ms) = env_parse::<u64>("CALENDAR_SYNC_SCRAPING_REQUEST_DELAY_MIN")? {
            config.scraping.request_delay.min_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("CALENDAR_SYNC_SCRAPING_REQUEST_DELAY_MAX")? {
            config.scraping.request_delay.max_ms = ms;
        }
        if let Some(n) = env_parse::<u32>("CALENDAR_SYNC_SCRAPING_MAX_RETRIES")? {
            config.scraping.retry.max_retries = n;
        }

        if let Some(secs) = env_parse::<u64>("CALENDAR_SYNC_SCHEDULER_POLL_INTERVAL_SECS")? {
            config.scheduler.poll_interval_secs = secs;
        }

        if let Ok(path) = std::env::var("CALENDAR_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }

        if let Some(enabled) = env_parse::<bool>("CALENDAR_SYNC_OTEL_ENABLED")? {
            config.otel.enabled = enabled;
        }
        if let Ok(endpoint) = std::env::var("CALENDAR_SYNC_OTEL_ENDPOINT") {
            config.otel.endpoint = Some(endpoint);
        }

        if let Ok(level) = std::env::var("CALENDAR_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("CALENDAR_SYNC_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Reject combinations the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let delay = &self.scraping.request_delay;
        if delay.min_ms > delay.max_ms {
            return Err(ConfigError::InvalidValue(format!(
                "scraping.request_delay.min ({}) exceeds max ({})",
                delay.min_ms, delay.max_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.proxy.min_success_rate) {
            return Err(ConfigError::InvalidValue(format!(
                "proxy.min_success_rate must be within [0, 1], got {}",
                self.proxy.min_success_rate
            )));
        }
        if self.scraping.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "scraping.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.scraping.retry.max_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "scraping.retry.max_retries must be at least 1".to_string(),
            ));
        }
        if self.proxy.success_window == 0 {
            return Err(ConfigError::InvalidValue(
                "proxy.success_window must be at least 1".to_string(),
            ));
        }
        if self.proxy.min_samples > self.proxy.success_window {
            return Err(ConfigError::InvalidValue(format!(
                "proxy.min_samples ({}) exceeds proxy.success_window ({})",
                self.proxy.min_samples, self.proxy.success_window
            )));
        }
        if self.proxy.checked_rotation_interval().is_none() {
            return Err(ConfigError::InvalidValue(format!(
                "proxy.rotation_interval ({} minutes) is out of range",
                self.proxy.rotation_interval_mins
            )));
        }
        Ok(())
    }
}

/// Stealth (fingerprint disguise) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StealthConfig {
    /// Whether sessions carry a disguised fingerprint
    #[serde(default = "default_stealth_enabled")]
    pub enabled: bool,
}

impl Default for StealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_stealth_enabled(),
        }
    }
}

fn default_stealth_enabled() -> bool {
    true
}

/// Egress network class of a proxy endpoint
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    /// Residential ISP address
    #[default]
    Residential,
    /// Datacenter address
    Datacenter,
}

/// A configured egress endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyIdentityConfig {
    /// Proxy URL (http://, https:// or socks5://), credentials inline
    pub url: String,

    /// Network class
    #[serde(default)]
    pub kind: ProxyKind,

    /// Human-readable label for status output
    #[serde(default)]
    pub label: Option<String>,
}

/// Proxy pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyConfig {
    /// Minutes after which an identity is retired regardless of outcome
    #[serde(
        default = "default_rotation_interval",
        alias = "rotation_interval",
        alias = "rotationInterval"
    )]
    pub rotation_interval_mins: u64,

    /// Rolling success rate below which an identity is evicted
    #[serde(default = "default_min_success_rate", alias = "minSuccessRate")]
    pub min_success_rate: f64,

    /// Exclude datacenter endpoints from the pool
    #[serde(default = "default_residential_only", alias = "residentialOnly")]
    pub residential_only: bool,

    /// Number of most recent outcomes in the rolling window
    #[serde(default = "default_success_window", alias = "successWindow")]
    pub success_window: usize,

    /// Outcomes recorded before eviction is evaluated
    #[serde(default = "default_min_samples", alias = "minSamples")]
    pub min_samples: usize,

    /// Egress endpoints
    #[serde(default)]
    pub identities: Vec<ProxyIdentityConfig>,
}

impl ProxyConfig {
    /// Rotation interval as a chrono duration, saturating at `Duration::MAX`
    pub fn rotation_interval(&self) -> chrono::Duration {
        self.checked_rotation_interval()
            .unwrap_or(chrono::Duration::MAX)
    }

    fn checked_rotation_interval(&self) -> Option<chrono::Duration> {
        i64::try_from(self.rotation_interval_mins)
            .ok()
            .and_then(chrono::Duration::try_minutes)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            rotation_interval_mins: default_rotation_interval(),
            min_success_rate: default_min_success_rate(),
            residential_only: default_residential_only(),
            success_window: default_success_window(),
            min_samples: default_min_samples(),
            identities: Vec::new(),
        }
    }
}

fn default_rotation_interval() -> u64 {
    30
}

fn default_min_success_rate() -> f64 {
    0.70
}

fn default_residential_only() -> bool {
    true
}

fn default_success_window() -> usize {
    10
}

fn default_min_samples() -> usize {
    1
}

/// Scraping behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapingConfig {
    /// Number of properties synced in parallel
    #[serde(default = "default_max_concurrency", alias = "maxConcurrency")]
    pub max_concurrency: usize,

    /// Randomized pause before and between page interactions
    #[serde(default, alias = "requestDelay")]
    pub request_delay: RequestDelayConfig,

    /// Retry executor knobs
    #[serde(default)]
    pub retry: RetryConfig,

    /// Attempts at acquiring a session before the job is cancelled
    #[serde(default = "default_pool_acquire_retries", alias = "poolAcquireRetries")]
    pub pool_acquire_retries: u32,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            request_delay: RequestDelayConfig::default(),
            retry: RetryConfig::default(),
            pool_acquire_retries: default_pool_acquire_retries(),
        }
    }
}

fn default_max_concurrency() -> usize {
    3
}

fn default_pool_acquire_retries() -> u32 {
    3
}

/// Jitter bounds in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestDelayConfig {
    /// Lower bound (inclusive)
    #[serde(default = "default_delay_min", alias = "min")]
    pub min_ms: u64,

    /// Upper bound (inclusive)
    #[serde(default = "default_delay_max", alias = "max")]
    pub max_ms: u64,
}

impl Default for RequestDelayConfig {
    fn default() -> Self {
        Self {
            min_ms: default_delay_min(),
            max_ms: default_delay_max(),
        }
    }
}

fn default_delay_min() -> u64 {
    1000
}

fn default_delay_max() -> u64 {
    5000
}

/// Retry configuration for network-bound scraping steps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_attempt_timeout", alias = "attemptTimeoutMs")]
    pub attempt_timeout_ms: u64,

    /// Backoff before the second attempt, doubled for every further one
    #[serde(default = "default_initial_backoff", alias = "initialBackoffMs")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_max_backoff", alias = "maxBackoffMs")]
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    /// Per-attempt timeout
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            attempt_timeout_ms: default_attempt_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_attempt_timeout() -> u64 {
    30_000
}

fn default_initial_backoff() -> u64 {
    2_000
}

fn default_max_backoff() -> u64 {
    30_000
}

/// Per-platform adapter options
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlatformsConfig {
    /// Airbnb adapter
    #[serde(default)]
    pub airbnb: AirbnbConfig,
}

/// Airbnb adapter options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AirbnbConfig {
    /// Number of calendar months requested, starting with the current one
    #[serde(default = "default_airbnb_months")]
    pub months: u32,
}

impl Default for AirbnbConfig {
    fn default() -> Self {
        Self {
            months: default_airbnb_months(),
        }
    }
}

fn default_airbnb_months() -> u32 {
    12
}

/// Sync loop cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Seconds between scheduling passes
    #[serde(default = "default_poll_interval", alias = "pollIntervalSecs")]
    pub poll_interval_secs: u64,

    /// Seconds before the first pass
    #[serde(default = "default_initial_delay", alias = "initialDelaySecs")]
    pub initial_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            initial_delay_secs: default_initial_delay(),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}

fn default_initial_delay() -> u64 {
    5
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "/data/db/calendar-sync.db".to_string()
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Whether to use insecure connection
    #[serde(default)]
    pub insecure: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name", alias = "serviceName")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            insecure: false,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "calendar-sync".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Read and parse an optional environment variable
fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", name, raw))),
        Err(_) => Ok(None),
    }
}

fn parse_identity_list(list: &str) -> Result<Vec<ProxyIdentityConfig>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (kind, url) = match entry.split_once('=') {
                Some(("residential", url)) => (ProxyKind::Residential, url),
                Some(("datacenter", url)) => (ProxyKind::Datacenter, url),
                Some((other, _)) if !other.contains("://") => {
                    return Err(ConfigError::InvalidValue(format!(
                        "unknown proxy kind: {}",
                        other
                    )))
                }
                _ => (ProxyKind::Residential, entry),
            };
            Ok(ProxyIdentityConfig {
                url: url.to_string(),
                kind,
                label: None,
            })
        })
        .collect()
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
