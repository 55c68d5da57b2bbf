// crates/db/src/queries/metrics.rs
//! Aggregate queue health counters (for GET /api/metrics).

use crate::queries::QueueMetrics;
use crate::{now_ms, Database, DbResult};

impl Database {
    /// Snapshot of queue depth and recent throughput. `window_ms` bounds
    /// the trailing window for the completed/failed counts and the average
    /// duration of completed jobs.
    pub async fn queue_metrics(&self, window_ms: i64) -> DbResult<QueueMetrics> {
        let cutoff = now_ms() - window_ms;
        let row: (i64, i64, i64, i64, i64, Option<f64>) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status IN ('claimed', 'cloning', 'analyzing')),
                COUNT(*) FILTER (WHERE status = 'completed' AND completed_at >= ?1),
                COUNT(*) FILTER (WHERE last_failed_at >= ?1),
                COUNT(*) FILTER (WHERE status = 'dead'),
                AVG(CASE WHEN status = 'completed' AND completed_at >= ?1
                         THEN completed_at - created_at END)
            FROM jobs
            "#,
        )
        .bind(cutoff)
        .fetch_one(self.pool())
        .await?;

        Ok(QueueMetrics {
            pending: row.0,
            running: row.1,
            completed_recent: row.2,
            failed_recent: row.3,
            dead: row.4,
            avg_duration_ms: row.5,
            window_ms,
        })
    }
}
