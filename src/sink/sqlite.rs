//! SQLite crawl log sink
//!
//! Persists one row per finished task so crawl history can be inspected after
//! the process exits. Only outcomes are stored; task state itself is never
//! persisted.

use crate::scheduler::TaskId;
use crate::sink::schema::initialize_schema;
use crate::sink::{CrawlLogEntry, CrawlLogSink};
use crate::TrendcrawlError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Crawl log stored in a SQLite database
#[derive(Clone)]
pub struct SqliteLogSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLogSink {
    /// Opens (or creates) the crawl log database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteLogSink)` - Successfully opened/created database
    /// * `Err(TrendcrawlError)` - Failed to open database
    pub fn open(path: &Path) -> Result<Self, TrendcrawlError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory crawl log
    pub fn in_memory() -> Result<Self, TrendcrawlError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Inserts an entry, returning its row id
    pub fn insert(&self, entry: &CrawlLogEntry) -> Result<i64, TrendcrawlError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO crawl_logs
                (task_id, summary, success, item_count, error_message, duration_ms, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.task_id.0 as i64,
                entry.summary,
                entry.success as i32,
                entry.item_count as i64,
                entry.error_message,
                entry.duration_ms as i64,
                entry.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Returns up to `limit` most recent entries, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<CrawlLogEntry>, TrendcrawlError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT task_id, summary, success, item_count, error_message, duration_ms, recorded_at
             FROM crawl_logs
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            let task_id: i64 = row.get(0)?;
            let success: i32 = row.get(2)?;
            let item_count: i64 = row.get(3)?;
            let duration_ms: i64 = row.get(5)?;
            let recorded_at: String = row.get(6)?;

            Ok(CrawlLogEntry {
                task_id: TaskId(task_id as u64),
                summary: row.get(1)?,
                success: success != 0,
                item_count: item_count as usize,
                error_message: row.get(4)?,
                duration_ms: duration_ms as u64,
                // Rows are only written by `insert`, which always stores RFC 3339
                recorded_at: recorded_at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Counts entries, optionally only successful or failed ones
    pub fn count(&self, success: Option<bool>) -> Result<u64, TrendcrawlError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = match success {
            Some(flag) => conn.query_row(
                "SELECT COUNT(*) FROM crawl_logs WHERE success = ?1",
                params![flag as i32],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM crawl_logs", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }
}

#[async_trait]
impl CrawlLogSink for SqliteLogSink {
    async fn record(&self, entry: &CrawlLogEntry) -> anyhow::Result<()> {
        let sink = self.clone();
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || sink.insert(&entry)).await??;
        Ok(())
    }
}
