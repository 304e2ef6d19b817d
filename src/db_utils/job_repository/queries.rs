use log::debug;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::base::JobRepository;
use super::helpers::row_to_job;
use crate::error::{AppError, AppResult};
use crate::jobs::types::Job;
use crate::models::{JobStatus, StageQueue};
use crate::utils::get_timestamp;

/// Observability snapshot of one queue's job counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    pub queue: StageQueue,
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

impl JobRepository {
    pub async fn get_job_by_id(&self, job_id: &str) -> AppResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch job: {e}")))?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Queued jobs on one queue whose `process_after` has arrived, ordered by
    /// priority then age. Used by the scheduler's database poll.
    pub async fn get_due_jobs(&self, queue: StageQueue, limit: u32) -> AppResult<Vec<Job>> {
        let now = get_timestamp();
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE queue = $1
            AND status = $2
            AND (process_after IS NULL OR process_after <= $3)
            ORDER BY priority DESC, created_at ASC
            LIMIT $4
            "#,
        )
        .bind(queue.queue_name())
        .bind(JobStatus::Queued.to_string())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch due jobs: {e}")))?;

        rows.iter().map(row_to_job).collect()
    }

    /// All queued jobs, regardless of eligibility. Used for startup recovery.
    pub async fn get_queued_jobs(&self) -> AppResult<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE status = $1 ORDER BY created_at ASC")
            .bind(JobStatus::Queued.to_string())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch queued jobs: {e}")))?;

        rows.iter().map(row_to_job).collect()
    }

    /// Whether a non-terminal job already exists for this (client, queue)
    /// pair. The webhook adapter uses this to suppress duplicate work when
    /// the same external event is delivered twice under different event ids.
    pub async fn has_active_job(&self, client_id: &str, queue: StageQueue) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM jobs WHERE client_id = $1 AND queue = $2 AND status IN ($3, $4)",
        )
        .bind(client_id)
        .bind(queue.queue_name())
        .bind(JobStatus::Queued.to_string())
        .bind(JobStatus::Running.to_string())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to check active jobs: {e}")))?;

        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }

    /// Permanently failed jobs flagged for manual intervention.
    pub async fn get_jobs_requiring_attention(&self) -> AppResult<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status = $1 ORDER BY completed_at DESC LIMIT 100",
        )
        .bind(JobStatus::Failed.to_string())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch failed jobs: {e}")))?;

        rows.iter().map(row_to_job).collect()
    }

    pub async fn queue_depth(&self, queue: StageQueue) -> AppResult<QueueDepth> {
        let mut depth = QueueDepth { queue, queued: 0, running: 0, completed: 0, failed: 0 };

        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM jobs WHERE queue = $1 GROUP BY status",
        )
        .bind(queue.queue_name())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to count jobs: {e}")))?;

        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match status.as_str() {
                "queued" => depth.queued = n,
                "running" => depth.running = n,
                "completed" => depth.completed = n,
                "failed" => depth.failed = n,
                other => debug!("Unexpected status in queue depth query: {other}"),
            }
        }

        Ok(depth)
    }
}
