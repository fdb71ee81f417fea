//! Error classification for crawl failures
//!
//! This module turns raw failures into typed errors:
//! - Pattern matching on error messages to pick an [`ErrorKind`]
//! - Retryability per kind
//! - A bounded history of recent errors for statistics
//! - Exponential backoff delays for retrying callers

mod classifier;
mod kind;

pub use classifier::{
    retry_delay, ClassifiedError, ErrorClassifier, ErrorStats, DEFAULT_BASE_DELAY, HISTORY_CAPACITY,
    MAX_RETRY_DELAY,
};
pub use kind::ErrorKind;
