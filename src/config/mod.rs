//! Configuration module for Trendcrawl
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files, then layering `TRENDCRAWL_*` environment overrides on top.
//! Configuration is read once at startup.
//!
//! # Example
//!
//! ```no_run
//! use trendcrawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("trendcrawl.toml")).unwrap();
//! println!("Scheduler runs {} tasks at once", config.scheduler.max_concurrent);
//! ```

mod parser;
mod tasks;
mod types;
mod validation;

// Re-export types
pub use types::{Config, HttpConfig, LogConfig, ProxyEntry, RateLimiterConfig, SchedulerConfig};

pub use tasks::{load_task_file, parse_task_file, TaskEntry, TaskFile};

// Re-export parser functions
pub use parser::{
    apply_overrides, compute_config_hash, load_config, load_config_with_hash,
    parse_config, ENV_PREFIX,
};
