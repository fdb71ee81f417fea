//! Request throttling
//!
//! This module provides the sliding-window [`RateLimiter`] that every crawl
//! attempt passes through before it is allowed to hit the network:
//! - Per-minute and per-hour request windows
//! - A forced cooldown once the hourly ceiling is reached
//! - An async wait that wakes as soon as a slot can open

mod rate_limiter;

pub use rate_limiter::{RateLimiter, RateLimiterStats, POLL_INTERVAL};
