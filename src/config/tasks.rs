//! Task file loading
//!
//! Task files list crawl tasks to submit at startup:
//!
//! ```toml
//! [[task]]
//! priority = "high"
//! max-retries = 5
//! delay-secs = 30
//! params = { platform = "shopee", keyword = "desk lamp", url = "https://shop.example/search?q=lamp" }
//! ```

use crate::scheduler::{Priority, TaskSpec};
use crate::TrendcrawlError;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::path::Path;

/// Longest accepted start delay (one year); larger values are clamped
pub const MAX_DELAY_SECS: u64 = 366 * 24 * 60 * 60;

/// Top-level structure of a task file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskFile {
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskEntry>,
}

/// One `[[task]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TaskEntry {
    #[serde(default)]
    pub priority: Priority,

    /// Overrides the scheduler's default retry budget
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Seconds after loading before the task becomes admissible
    #[serde(default)]
    pub delay_secs: Option<u64>,

    /// Parameters handed to the executor
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl TaskEntry {
    /// Converts the entry into a submission, resolving the delay against now
    pub fn to_spec(&self) -> TaskSpec {
        let mut spec = TaskSpec::new(self.params.clone()).priority(self.priority);
        if let Some(max_retries) = self.max_retries {
            spec = spec.max_retries(max_retries);
        }
        if let Some(delay) = self.delay_secs.filter(|d| *d > 0) {
            let secs = delay.min(MAX_DELAY_SECS) as i64;
            spec = spec.scheduled_at(Utc::now() + Duration::seconds(secs));
        }
        spec
    }
}

/// Parses task file content
pub fn parse_task_file(content: &str) -> Result<TaskFile, TrendcrawlError> {
    let file: TaskFile =
        toml::from_str(content).map_err(|e| TrendcrawlError::TaskFile(e.to_string()))?;

    if let Some(index) = file.tasks.iter().position(|t| !t.params.is_object()) {
        return Err(TrendcrawlError::TaskFile(format!(
            "task #{} params must be a table",
            index + 1
        )));
    }
    Ok(file)
}

/// Loads a task file from disk
pub fn load_task_file(path: &Path) -> Result<TaskFile, TrendcrawlError> {
    let content = std::fs::read_to_string(path)?;
    parse_task_file(&content)
}
