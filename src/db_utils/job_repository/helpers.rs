use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::jobs::types::{Job, JobPayload};
use crate::models::{JobPriority, JobStatus, StageQueue};

/// Convert a jobs-table row into a `Job`.
pub(super) fn row_to_job(row: &SqliteRow) -> AppResult<Job> {
    let queue_str: String = row.try_get("queue")?;
    let queue = StageQueue::from_str(&queue_str)
        .map_err(|e| AppError::DatabaseError(format!("Corrupt queue column: {e}")))?;

    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|e| AppError::DatabaseError(format!("Corrupt status column: {e}")))?;

    let payload_json: String = row.try_get("payload")?;
    let payload: JobPayload = serde_json::from_str(&payload_json)
        .map_err(|e| AppError::DatabaseError(format!("Corrupt payload column: {e}")))?;

    let priority_index: i64 = row.try_get("priority")?;
    let attempt_count: i64 = row.try_get("attempt_count")?;
    let max_attempts: i64 = row.try_get("max_attempts")?;

    Ok(Job {
        id: row.try_get("id")?,
        queue,
        payload,
        status,
        priority: JobPriority::from_index(priority_index),
        attempt_count: attempt_count as u32,
        max_attempts: max_attempts as u32,
        process_after: row.try_get("process_after")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        last_error: row.try_get("last_error")?,
        chained_from: row.try_get("chained_from")?,
    })
}
