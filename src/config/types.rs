use serde::Deserialize;

/// Main configuration structure for Trendcrawl
///
/// Every section is optional in the TOML file and falls back to its defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(rename = "rate-limiter", default)]
    pub rate_limiter: RateLimiterConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub proxy: Vec<ProxyEntry>,
}

/// Task scheduling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SchedulerConfig {
    /// Maximum number of tasks executing at once
    pub max_concurrent: usize,

    /// Retry budget for tasks that don't specify their own
    pub default_max_retries: u32,

    /// Pause before dispatching again after a failed attempt (milliseconds)
    pub retry_pause_ms: u64,

    /// Fail tasks immediately when their error is classified as not retryable
    pub respect_retryable: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            default_max_retries: 3,
            retry_pause_ms: 1000,
            respect_retryable: false,
        }
    }
}

/// Sliding-window rate limit configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateLimiterConfig {
    /// Requests admitted within any trailing 60 seconds
    pub max_requests_per_minute: u32,

    /// Requests admitted within any trailing hour before a cooldown starts
    pub max_requests_per_hour: u32,

    /// Length of the cooldown (milliseconds)
    pub cooldown_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 30,
            max_requests_per_hour: 500,
            cooldown_ms: 60_000,
        }
    }
}

/// HTTP executor configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    pub user_agent: String,

    /// Per-request timeout (seconds)
    pub timeout_secs: u64,

    /// Attempts per fetch before giving the failure back to the scheduler
    pub max_fetch_attempts: u32,

    /// Base delay for exponential backoff between fetch attempts (milliseconds)
    pub retry_base_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("trendcrawl/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_fetch_attempts: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

/// Crawl log configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogConfig {
    /// SQLite database receiving one row per finished task; logs go to
    /// tracing only when unset
    pub database_path: Option<String>,
}

/// Outbound proxy entry
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyEntry {
    /// Proxy URL (http, https or socks5)
    pub address: String,

    pub username: Option<String>,

    pub password: Option<String>,
}
