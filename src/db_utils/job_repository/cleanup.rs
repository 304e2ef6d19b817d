use log::info;

use super::base::JobRepository;
use crate::error::{AppError, AppResult};
use crate::models::{JobStatus, StageQueue};

impl JobRepository {
    /// Delete finished rows beyond the per-queue retention window, keeping
    /// the most recent `retain_per_queue` completed/failed jobs on each queue
    /// for inspection.
    pub async fn prune_finished_jobs(&self, retain_per_queue: u32) -> AppResult<u64> {
        let mut total = 0u64;

        for queue in StageQueue::all() {
            let result = sqlx::query(
                r#"
                DELETE FROM jobs
                WHERE queue = $1
                AND status IN ($2, $3)
                AND id NOT IN (
                    SELECT id FROM jobs
                    WHERE queue = $1 AND status IN ($2, $3)
                    ORDER BY completed_at DESC
                    LIMIT $4
                )
                "#,
            )
            .bind(queue.queue_name())
            .bind(JobStatus::Completed.to_string())
            .bind(JobStatus::Failed.to_string())
            .bind(retain_per_queue as i64)
            .execute(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to prune jobs: {e}")))?;

            total += result.rows_affected();
        }

        if total > 0 {
            info!("Pruned {total} finished job(s) past the retention window");
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_utils::connection::test_pool;
    use crate::jobs::types::{AiProcessingPayload, Job, JobPayload};
    use crate::models::JobPriority;
    use crate::utils::{get_timestamp, new_id};

    #[tokio::test]
    async fn pruning_keeps_the_newest_finished_rows() {
        let pool = test_pool().await;
        let repo = JobRepository::new(pool);

        for i in 0..5 {
            let job = Job {
                id: format!("job-{i}"),
                queue: StageQueue::AiProcessing,
                payload: JobPayload::AiProcessing(AiProcessingPayload {
                    client_id: "c-1".to_string(),
                    form_response_id: new_id(),
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
            };
            repo.insert_job(&job).await.unwrap();
            assert!(repo.claim_job(&job.id).await.unwrap());
            repo.mark_completed(&job.id, None).await.unwrap();
        }

        let pruned = repo.prune_finished_jobs(2).await.unwrap();
        assert_eq!(pruned, 3);

        let depth = repo.queue_depth(StageQueue::AiProcessing).await.unwrap();
        assert_eq!(depth.completed, 2);

        // Unfinished rows are never pruned.
        assert_eq!(repo.prune_finished_jobs(2).await.unwrap(), 0);
    }
}
