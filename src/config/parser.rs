use crate::config::types::{Config, ProxyEntry};
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::str::FromStr;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "TRENDCRAWL_";

/// Loads and parses a configuration file from the given path
///
/// Environment overrides are applied after parsing and before validation.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use trendcrawl::config::load_config;
///
/// let config = load_config(Path::new("trendcrawl.toml")).unwrap();
/// println!("Max concurrent: {}", config.scheduler.max_concurrent);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, |name| std::env::var(name).ok())
}

/// Parses configuration text and applies overrides from `lookup`
///
/// `lookup` receives full variable names (e.g. `TRENDCRAWL_MAX_CONCURRENT`).
pub fn parse_config<F>(content: &str, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config = toml::from_str(content)?;
    apply_overrides(&mut config, lookup)?;
    validate(&config)?;
    Ok(config)
}

/// Applies `TRENDCRAWL_*` overrides to a configuration
///
/// `TRENDCRAWL_PROXIES` replaces the configured proxy list with a
/// comma-separated list of addresses.
pub fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |suffix: &str| {
        let name = format!("{}{}", ENV_PREFIX, suffix);
        lookup(&name).map(|value| (name, value))
    };

    if let Some((name, value)) = var("MAX_CONCURRENT") {
        config.scheduler.max_concurrent = parse_env(&name, &value)?;
    }
    if let Some((name, value)) = var("DEFAULT_MAX_RETRIES") {
        config.scheduler.default_max_retries = parse_env(&name, &value)?;
    }
    if let Some((name, value)) = var("MAX_REQUESTS_PER_MINUTE") {
        config.rate_limiter.max_requests_per_minute = parse_env(&name, &value)?;
    }
    if let Some((name, value)) = var("MAX_REQUESTS_PER_HOUR") {
        config.rate_limiter.max_requests_per_hour = parse_env(&name, &value)?;
    }
    if let Some((name, value)) = var("COOLDOWN_MS") {
        config.rate_limiter.cooldown_ms = parse_env(&name, &value)?;
    }
    if let Some((_, value)) = var("PROXIES") {
        config.proxy = value
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(|address| ProxyEntry {
                address: address.to_string(),
                username: None,
                password: None,
            })
            .collect();
    }

    Ok(())
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so runs can be matched to the configuration they used.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
