use log::info;

use super::base::JobRepository;
use crate::error::{AppError, AppResult};
use crate::jobs::types::Job;
use crate::models::JobStatus;
use crate::utils::get_timestamp;

impl JobRepository {
    /// Persist a freshly enqueued job row.
    pub async fn insert_job(&self, job: &Job) -> AppResult<()> {
        let payload_json = serde_json::to_string(&job.payload)
            .map_err(|e| AppError::SerializationError(format!("Failed to serialize payload: {e}")))?;
        let now = get_timestamp();

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue, payload, status, priority, attempt_count, max_attempts,
                process_after, created_at, updated_at, chained_from, client_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&job.id)
        .bind(job.queue.queue_name())
        .bind(payload_json)
        .bind(job.status.to_string())
        .bind(job.priority as i64)
        .bind(job.attempt_count as i64)
        .bind(job.max_attempts as i64)
        .bind(job.process_after)
        .bind(job.created_at)
        .bind(now)
        .bind(&job.chained_from)
        .bind(job.client_id())
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert job: {e}")))?;

        Ok(())
    }

    /// Compare-and-swap claim: queued → running, consuming one attempt.
    /// Returns false if another worker already claimed the job (or it was
    /// completed/failed in the meantime), which callers treat as "skip".
    pub async fn claim_job(&self, job_id: &str) -> AppResult<bool> {
        let now = get_timestamp();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, started_at = $2, updated_at = $2,
                attempt_count = attempt_count + 1
            WHERE id = $3 AND status = $4 AND attempt_count < max_attempts
            "#,
        )
        .bind(JobStatus::Running.to_string())
        .bind(now)
        .bind(job_id)
        .bind(JobStatus::Queued.to_string())
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to claim job: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_completed(
        &self,
        job_id: &str,
        output: Option<&serde_json::Value>,
    ) -> AppResult<()> {
        let now = get_timestamp();
        let output_json = output
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(|e| AppError::SerializationError(format!("Failed to serialize output: {e}")))?;

        // The result column is observability-only; the payload column keeps
        // the original input.
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, completed_at = $2, updated_at = $2,
                last_error = NULL, result = $3
            WHERE id = $4
            "#,
        )
        .bind(JobStatus::Completed.to_string())
        .bind(now)
        .bind(output_json)
        .bind(job_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to mark job completed: {e}")))?;

        Ok(())
    }

    /// Mark a job permanently failed. This is the escalation point: the row
    /// keeps its final error and is surfaced by `get_jobs_requiring_attention`.
    pub async fn mark_failed(&self, job_id: &str, error_message: &str) -> AppResult<()> {
        let now = get_timestamp();

        sqlx::query(
            "UPDATE jobs SET status = $1, completed_at = $2, updated_at = $2, last_error = $3 WHERE id = $4",
        )
        .bind(JobStatus::Failed.to_string())
        .bind(now)
        .bind(error_message)
        .bind(job_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to mark job failed: {e}")))?;

        Ok(())
    }

    /// Re-queue a failed attempt with a backoff deadline. The job keeps its
    /// identity and attempt count; only eligibility and the recorded error
    /// change.
    pub async fn requeue_for_retry(
        &self,
        job_id: &str,
        process_after: i64,
        error_message: &str,
    ) -> AppResult<()> {
        let now = get_timestamp();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, process_after = $2, updated_at = $3, last_error = $4
            WHERE id = $5 AND status = $6
            "#,
        )
        .bind(JobStatus::Queued.to_string())
        .bind(process_after)
        .bind(now)
        .bind(error_message)
        .bind(job_id)
        .bind(JobStatus::Running.to_string())
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to requeue job: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::JobError(format!(
                "Job {job_id} was not running when retry was scheduled"
            )));
        }

        Ok(())
    }

    /// Administrative re-enqueue of a permanently failed job as a fresh
    /// attempt cycle.
    pub async fn reset_for_manual_retry(&self, job_id: &str) -> AppResult<bool> {
        let now = get_timestamp();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, attempt_count = 0, process_after = NULL,
                started_at = NULL, completed_at = NULL, updated_at = $2
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(JobStatus::Queued.to_string())
        .bind(now)
        .bind(job_id)
        .bind(JobStatus::Failed.to_string())
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to reset job: {e}")))?;

        let reset = result.rows_affected() == 1;
        if reset {
            info!("Job {job_id} manually re-enqueued for a fresh attempt cycle");
        }
        Ok(reset)
    }
}
