//! Crawl executors
//!
//! The scheduler knows nothing about what a task crawls: it hands the task's
//! opaque parameters to a [`CrawlExecutor`] and gets back either a
//! [`CrawlOutput`] or an error. This module defines that seam and ships an
//! HTTP implementation.

mod http;

pub use http::{build_http_client, extract_items, ExtractedPage, HttpExecutor};

use crate::proxy::ProxyEndpoint;
use crate::scheduler::TaskId;
use crate::throttle::RateLimiter;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Opaque task payload (platform, keyword, page limit, url, ...)
pub type TaskParams = serde_json::Value;

/// What an executor returns on success
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrawlOutput {
    /// Executor-specific result payload
    pub data: serde_json::Value,

    /// Number of records extracted, reported to the crawl log
    pub item_count: usize,
}

/// Per-attempt information handed to the executor
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// The task being executed
    pub task_id: TaskId,

    /// Retries already spent on this task (0 on the first attempt)
    pub attempt: u32,

    /// Egress proxy picked for this attempt, if the pool has any
    pub proxy: Option<ProxyEndpoint>,

    /// Limiter the attempt's first request was admitted by
    ///
    /// Executors that send more than one request per attempt must take a
    /// slot from it for every request after the first.
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

/// Performs one unit of crawl work
///
/// Errors are opaque to the scheduler; their message is classified to decide
/// what is recorded and whether a proxy should leave rotation.
#[async_trait]
pub trait CrawlExecutor: Send + Sync {
    async fn execute(
        &self,
        params: &TaskParams,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<CrawlOutput>;
}

/// Builds a short human-readable summary of task parameters for logs
///
/// Picks the well-known keys when present and falls back to compact JSON.
pub fn summarize_params(params: &TaskParams) -> String {
    const KEYS: &[&str] = &["platform", "keyword", "url", "max_pages"];

    let parts: Vec<String> = KEYS
        .iter()
        .filter_map(|key| {
            params.get(*key).map(|value| match value {
                serde_json::Value::String(s) => format!("{}={}", key, s),
                other => format!("{}={}", key, other),
            })
        })
        .collect();

    if parts.is_empty() {
        params.to_string()
    } else {
        parts.join(" ")
    }
}
