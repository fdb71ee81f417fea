//! Crawl log sinks
//!
//! After every task reaches a terminal state the scheduler sends one
//! [`CrawlLogEntry`] to its sink. Delivery is fire-and-forget: a failing sink
//! is logged and never affects task state.

mod schema;
mod sqlite;

pub use sqlite::SqliteLogSink;

use crate::scheduler::TaskId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome record of one finished task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlLogEntry {
    pub task_id: TaskId,

    /// Short description of the task parameters
    pub summary: String,

    pub success: bool,

    /// Records extracted (0 on failure)
    pub item_count: usize,

    /// Final error message on failure
    pub error_message: Option<String>,

    /// Duration of the final attempt in milliseconds
    pub duration_ms: u64,

    pub recorded_at: DateTime<Utc>,
}

/// Receives crawl log entries
#[async_trait]
pub trait CrawlLogSink: Send + Sync {
    async fn record(&self, entry: &CrawlLogEntry) -> anyhow::Result<()>;
}

/// Sink that writes entries to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

#[async_trait]
impl CrawlLogSink for TracingLogSink {
    async fn record(&self, entry: &CrawlLogEntry) -> anyhow::Result<()> {
        if entry.success {
            tracing::info!(
                task = %entry.task_id,
                items = entry.item_count,
                duration_ms = entry.duration_ms,
                "Crawl finished: {}",
                entry.summary
            );
        } else {
            tracing::info!(
                task = %entry.task_id,
                duration_ms = entry.duration_ms,
                error = entry.error_message.as_deref().unwrap_or("-"),
                "Crawl failed: {}",
                entry.summary
            );
        }
        Ok(())
    }
}
