//! Database schema for the crawl log

use rusqlite::Connection;

/// SQL schema for the crawl log database
pub const SCHEMA_SQL: &str = r#"
-- One row per task that reached a terminal state
CREATE TABLE IF NOT EXISTS crawl_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL,
    summary TEXT NOT NULL,
    success INTEGER NOT NULL,
    item_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    duration_ms INTEGER NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_logs_recorded ON crawl_logs(recorded_at);
CREATE INDEX IF NOT EXISTS idx_crawl_logs_success ON crawl_logs(success);
"#;

/// Creates the crawl log tables if they don't exist
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
