//! Request statistics for the local embedding daemon, kept in SQLite.

use std::path::Path;

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS embed_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    recorded_at TEXT NOT NULL,
    kind TEXT NOT NULL,
    texts INTEGER NOT NULL,
    latency_ms INTEGER NOT NULL,
    success INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_embed_requests_recorded_at ON embed_requests(recorded_at);
"#;

/// Whether a request embedded a question or document chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Query,
    Passages,
}

impl RequestKind {
    fn as_str(self) -> &'static str {
        match self {
            RequestKind::Query => "query",
            RequestKind::Passages => "passages",
        }
    }
}

pub struct MetricsStore {
    conn: Connection,
}

impl MetricsStore {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    fn in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Metrics are best effort; a failed write is logged and dropped.
    pub fn record(&self, kind: RequestKind, texts: usize, latency_ms: u64, success: bool) {
        if let Err(e) = self.conn.execute(
            "INSERT INTO embed_requests (recorded_at, kind, texts, latency_ms, success)
             VALUES (datetime('now'), ?1, ?2, ?3, ?4)",
            params![kind.as_str(), texts as i64, latency_ms as i64, success as i32],
        ) {
            debug!(error = %e, "failed to record metrics");
        }
    }

    pub fn summary(&self, retention_days: u32) -> MetricsSummary {
        let query = format!(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(texts), 0),
                COALESCE(SUM(CASE WHEN kind = 'query' THEN 1 ELSE 0 END), 0),
                COALESCE(AVG(latency_ms), 0),
                COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) * 100.0 / NULLIF(COUNT(*), 0), 0)
            FROM embed_requests
            WHERE recorded_at >= datetime('now', '-{} days')
            "#,
            retention_days
        );

        self.conn
            .query_row(&query, [], |row| {
                Ok(MetricsSummary {
                    total_requests: row.get::<_, i64>(0)? as u64,
                    total_texts: row.get::<_, i64>(1)? as u64,
                    query_requests: row.get::<_, i64>(2)? as u64,
                    avg_latency_ms: row.get::<_, f64>(3)? as u64,
                    error_rate: row.get::<_, f64>(4)? as f32,
                })
            })
            .unwrap_or_default()
    }

    /// Delete rows older than the retention window. Returns the number removed.
    pub fn cleanup(&self, retention_days: u32) -> usize {
        let query = format!(
            "DELETE FROM embed_requests WHERE recorded_at < datetime('now', '-{} days')",
            retention_days
        );
        self.conn.execute(&query, []).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_requests: u64,
    pub total_texts: u64,
    pub query_requests: u64,
    pub avg_latency_ms: u64,
    /// Percentage of failed requests
    pub error_rate: f32,
}
