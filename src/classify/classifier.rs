use crate::classify::ErrorKind;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Number of classified errors kept for statistics
pub const HISTORY_CAPACITY: usize = 100;

/// Default base delay for [`retry_delay`]
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound for [`retry_delay`]
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(30_000);

/// Message patterns per error kind, checked in order (first match wins)
///
/// Rate limiting and blocking are checked before the network markers so that
/// "HTTP 429" or "HTTP 403" responses are not swallowed by a generic
/// connection pattern.
const PATTERNS: &[(ErrorKind, &str)] = &[
    (
        ErrorKind::RateLimit,
        r"(?i)\b429\b|too many requests|rate.?limit",
    ),
    (
        ErrorKind::Blocked,
        r"(?i)\b403\b|captcha|access denied|forbidden|blocked",
    ),
    (
        ErrorKind::Network,
        r"(?i)econnrefused|enotfound|etimedout|econnreset|eai_again|connection refused|connection reset|network error|net::err_|dns error|socket hang up|getaddrinfo",
    ),
    (ErrorKind::Timeout, r"(?i)timeout|timed out"),
    (
        ErrorKind::Parse,
        r"(?i)selector|pars(e|ing)|undefined|cannot read propert|unexpected token",
    ),
];

/// A failure after classification
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedError {
    /// The category the message matched
    pub kind: ErrorKind,

    /// The original error message
    pub message: String,

    /// Whether retrying the same request can reasonably succeed
    pub retryable: bool,

    /// When the error was classified
    pub timestamp: DateTime<Utc>,

    /// URL being crawled when the error occurred, if known
    pub source_url: Option<String>,
}

/// Aggregate statistics over the classification history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorStats {
    /// Number of errors currently held in the history
    pub total: usize,

    /// Count per error kind (kinds with no errors are omitted)
    pub by_kind: HashMap<ErrorKind, usize>,

    /// Errors flagged as retryable
    pub retryable_count: usize,

    /// Errors flagged as not retryable
    pub non_retryable_count: usize,
}

/// Classifies raw failures and keeps a bounded history of them
///
/// The classifier is shared between the scheduler and executors through an
/// `Arc`; the history is guarded by a mutex so classification can happen from
/// any task.
pub struct ErrorClassifier {
    patterns: Vec<(ErrorKind, Regex)>,
    history: Mutex<VecDeque<ClassifiedError>>,
    capacity: usize,
}

impl ErrorClassifier {
    /// Creates a classifier with the default history capacity
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// Creates a classifier keeping at most `capacity` errors (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let patterns = PATTERNS
            .iter()
            .filter_map(|(kind, pattern)| match Regex::new(pattern) {
                Ok(regex) => Some((*kind, regex)),
                Err(e) => {
                    tracing::warn!("Invalid {} error pattern '{}': {}", kind, pattern, e);
                    None
                }
            })
            .collect();

        let capacity = capacity.max(1);

        Self {
            patterns,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Determines the error kind for a message without recording it
    ///
    /// Useful for retry loops that only need the retry decision.
    pub fn kind_of(&self, message: &str) -> ErrorKind {
        self.patterns
            .iter()
            .find(|(_, regex)| regex.is_match(message))
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    /// Classifies an error message and records it in the history
    ///
    /// # Arguments
    ///
    /// * `message` - The raw error message
    /// * `source_url` - The URL being crawled, if known
    ///
    /// # Returns
    ///
    /// The classified error (a copy of what was recorded)
    pub fn classify(&self, message: &str, source_url: Option<&str>) -> ClassifiedError {
        let kind = self.kind_of(message);
        let classified = ClassifiedError {
            kind,
            message: message.to_string(),
            retryable: kind.is_retryable(),
            timestamp: Utc::now(),
            source_url: source_url.map(str::to_string),
        };

        tracing::warn!(
            kind = %classified.kind,
            retryable = classified.retryable,
            url = classified.source_url.as_deref().unwrap_or("-"),
            "Crawl error: {}",
            classified.message
        );

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(classified.clone());

        classified
    }

    /// Classifies an `anyhow` error, using its full context chain as the message
    pub fn classify_error(&self, error: &anyhow::Error, source_url: Option<&str>) -> ClassifiedError {
        self.classify(&format!("{:#}", error), source_url)
    }

    /// Returns aggregate statistics over the current history
    pub fn stats(&self) -> ErrorStats {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());

        let mut stats = ErrorStats {
            total: history.len(),
            ..ErrorStats::default()
        };

        for error in history.iter() {
            *stats.by_kind.entry(error.kind).or_insert(0) += 1;
            if error.retryable {
                stats.retryable_count += 1;
            } else {
                stats.non_retryable_count += 1;
            }
        }

        stats
    }

    /// Returns up to `limit` most recent errors, newest first
    pub fn recent(&self, limit: usize) -> Vec<ClassifiedError> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Clears the history
    pub fn clear(&self) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the exponential backoff delay for a retry attempt
///
/// Returns `min(base * 2^attempt, 30s)`.
///
/// # Arguments
///
/// * `attempt` - Number of attempts already made (0 for the first retry)
/// * `base` - Delay for attempt 0, usually [`DEFAULT_BASE_DELAY`]
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor)
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}
