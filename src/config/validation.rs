use crate::config::types::{Config, HttpConfig, ProxyEntry, RateLimiterConfig, SchedulerConfig};
use crate::ConfigError;
use url::Url;

const PROXY_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_rate_limiter_config(&config.rate_limiter)?;
    validate_http_config(&config.http)?;
    validate_proxies(&config.proxy)?;
    Ok(())
}

/// Validates scheduler configuration
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent < 1 || config.max_concurrent > 100 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent must be between 1 and 100, got {}",
            config.max_concurrent
        )));
    }

    Ok(())
}

/// Validates rate limiter configuration
fn validate_rate_limiter_config(config: &RateLimiterConfig) -> Result<(), ConfigError> {
    if config.max_requests_per_minute < 1 {
        return Err(ConfigError::Validation(format!(
            "max_requests_per_minute must be >= 1, got {}",
            config.max_requests_per_minute
        )));
    }

    if config.max_requests_per_hour < config.max_requests_per_minute {
        return Err(ConfigError::Validation(format!(
            "max_requests_per_hour ({}) must be >= max_requests_per_minute ({})",
            config.max_requests_per_hour, config.max_requests_per_minute
        )));
    }

    Ok(())
}

/// Validates HTTP executor configuration
fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "timeout_secs must be >= 1, got {}",
            config.timeout_secs
        )));
    }

    if config.max_fetch_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_fetch_attempts must be >= 1, got {}",
            config.max_fetch_attempts
        )));
    }

    Ok(())
}

/// Validates proxy entries
fn validate_proxies(proxies: &[ProxyEntry]) -> Result<(), ConfigError> {
    for entry in proxies {
        let url = Url::parse(&entry.address).map_err(|e| {
            ConfigError::InvalidProxy(format!("'{}': {}", entry.address, e))
        })?;

        if !PROXY_SCHEMES.contains(&url.scheme()) {
            return Err(ConfigError::InvalidProxy(format!(
                "'{}' must use one of {}",
                entry.address,
                PROXY_SCHEMES.join(", ")
            )));
        }

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidProxy(format!(
                "'{}' has no host",
                entry.address
            )));
        }

        if entry.username.is_some() != entry.password.is_some() {
            return Err(ConfigError::InvalidProxy(format!(
                "'{}' needs both username and password, or neither",
                entry.address
            )));
        }
    }

    Ok(())
}
