use log::warn;

use super::base::JobRepository;
use crate::error::{AppError, AppResult};
use crate::models::JobStatus;
use crate::utils::get_timestamp;

impl JobRepository {
    /// Return running jobs that have not been touched within the threshold
    /// back to the queue. A worker that crashed mid-job leaves its row stuck
    /// in `running`; the scheduler calls this periodically so those rows get
    /// picked up again. The attempt consumed by the dead worker stays spent.
    pub async fn reset_stale_running(&self, threshold_secs: u64) -> AppResult<u64> {
        let now = get_timestamp();
        let cutoff = now - (threshold_secs as i64) * 1000;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, started_at = NULL, updated_at = $2,
                last_error = COALESCE(last_error, 'Reset after worker went stale')
            WHERE status = $3 AND updated_at < $4
            "#,
        )
        .bind(JobStatus::Queued.to_string())
        .bind(now)
        .bind(JobStatus::Running.to_string())
        .bind(cutoff)
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to reset stale jobs: {e}")))?;

        let reset = result.rows_affected();
        if reset > 0 {
            warn!("Reset {reset} stale running job(s) back to queued");
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_utils::connection::test_pool;
    use crate::jobs::types::{AiProcessingPayload, Job, JobPayload};
    use crate::models::JobPriority;
    use crate::utils::{get_timestamp, new_id};

    fn queued_job() -> Job {
        Job {
            id: new_id(),
            queue: crate::models::StageQueue::AiProcessing,
            payload: JobPayload::AiProcessing(AiProcessingPayload {
                client_id: "c-1".to_string(),
                form_response_id: "fr-1".to_string(),
            }),
            status: JobStatus::Queued,
            priority: JobPriority::Normal,
            attempt_count: 0,
            max_attempts: 3,
            process_after: None,
            created_at: get_timestamp(),
            started_at: None,
            completed_at: None,
            last_error: None,
            chained_from: None,
        }
    }

    #[tokio::test]
    async fn stale_running_jobs_return_to_queued_with_attempt_spent() {
        let pool = test_pool().await;
        let repo = JobRepository::new(pool.clone());

        let job = queued_job();
        repo.insert_job(&job).await.unwrap();
        assert!(repo.claim_job(&job.id).await.unwrap());

        // Backdate the row as if its worker died twenty minutes ago.
        sqlx::query("UPDATE jobs SET updated_at = $1 WHERE id = $2")
            .bind(get_timestamp() - 20 * 60 * 1000)
            .bind(&job.id)
            .execute(&*pool)
            .await
            .unwrap();

        assert_eq!(repo.reset_stale_running(900).await.unwrap(), 1);

        let row = repo.get_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Queued);
        assert_eq!(row.attempt_count, 1);
        assert!(row.last_error.is_some());
    }

    #[tokio::test]
    async fn fresh_running_jobs_are_left_alone() {
        let pool = test_pool().await;
        let repo = JobRepository::new(pool);

        let job = queued_job();
        repo.insert_job(&job).await.unwrap();
        assert!(repo.claim_job(&job.id).await.unwrap());

        assert_eq!(repo.reset_stale_running(900).await.unwrap(), 0);
        let row = repo.get_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Running);
    }
}
