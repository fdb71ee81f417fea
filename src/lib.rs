//! Trendcrawl: crawl task scheduling and execution control
//!
//! This crate runs crawl tasks for a trend-analysis pipeline under explicit
//! resource bounds: a priority task queue with a concurrency limit, a
//! sliding-window rate limiter with cooldown, a rotating proxy pool and an
//! error classifier that drives retry decisions.

pub mod classify;
pub mod config;
pub mod executor;
pub mod output;
pub mod proxy;
pub mod scheduler;
pub mod sink;
pub mod throttle;

use thiserror::Error;

/// Main error type for Trendcrawl operations
#[derive(Debug, Error)]
pub enum TrendcrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid task file: {0}")]
    TaskFile(String),

    #[error("Invalid priority: {0}")]
    Priority(#[from] ParsePriorityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxy(String),

    #[error("Invalid value for environment variable {name}: {value}")]
    Env { name: String, value: String },
}

/// Errors raised by the HTTP executor
///
/// The messages deliberately contain the markers the error classifier
/// looks for (status codes, "timeout", "network error", "selector").
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("missing '{0}' parameter")]
    MissingParameter(&'static str),

    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: ::url::ParseError,
    },

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("request timeout for {url}")]
    Timeout { url: String },

    #[error("network error connecting to {url}: {source}")]
    Connect { url: String, source: reqwest::Error },

    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("invalid proxy {address}: {source}")]
    Proxy {
        address: String,
        source: reqwest::Error,
    },

    #[error("invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },
}

/// Error returned when a priority name cannot be parsed
#[derive(Debug, Error)]
#[error("unknown priority '{0}' (expected low, normal, high or urgent)")]
pub struct ParsePriorityError(pub String);

/// Result type alias for Trendcrawl operations
pub type Result<T> = std::result::Result<T, TrendcrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use classify::{retry_delay, ClassifiedError, ErrorClassifier, ErrorKind};
pub use config::Config;
pub use executor::{CrawlExecutor, CrawlOutput, ExecutionContext};
pub use proxy::{ProxyEndpoint, ProxyPool};
pub use scheduler::{Priority, Scheduler, Task, TaskId, TaskSpec, TaskStatus};
pub use throttle::RateLimiter;
