use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::{FormAnswer, FormResponse};
use crate::utils::{get_timestamp, new_id};

/// Persistence for normalized diagnostic form submissions. `submission_id`
/// is unique per vendor submission, which is what makes replayed completion
/// webhooks safe to re-process.
#[derive(Debug, Clone)]
pub struct FormResponseRepository {
    pool: Arc<SqlitePool>,
}

fn row_to_response(row: &SqliteRow) -> AppResult<FormResponse> {
    let processed: String = row.try_get("processed_payload")?;
    let answers: Vec<FormAnswer> = serde_json::from_str(&processed)
        .map_err(|e| AppError::DatabaseError(format!("Corrupt processed_payload column: {e}")))?;

    Ok(FormResponse {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        form_id: row.try_get("form_id")?,
        submission_id: row.try_get("submission_id")?,
        answers,
        submitted_at: row.try_get("submitted_at")?,
        completion_time_minutes: row.try_get("completion_time_minutes")?,
        created_at: row.try_get("created_at")?,
    })
}

impl FormResponseRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Store a normalized submission alongside the raw vendor payload.
    /// A second insert for the same `submission_id` returns the stored row
    /// instead of erroring, so a replayed webhook is a no-op here.
    pub async fn insert_response(
        &self,
        client_id: &str,
        form_id: &str,
        submission_id: &str,
        answers: &[FormAnswer],
        raw_payload: &serde_json::Value,
        submitted_at: Option<i64>,
        completion_time_minutes: Option<f64>,
    ) -> AppResult<FormResponse> {
        if let Some(existing) = self.get_by_submission_id(submission_id).await? {
            return Ok(existing);
        }

        let now = get_timestamp();
        let response = FormResponse {
            id: new_id(),
            client_id: client_id.to_string(),
            form_id: form_id.to_string(),
            submission_id: submission_id.to_string(),
            answers: answers.to_vec(),
            submitted_at,
            completion_time_minutes,
            created_at: now,
        };

        let processed_json = serde_json::to_string(answers)
            .map_err(|e| AppError::SerializationError(format!("Failed to serialize answers: {e}")))?;
        let raw_json = serde_json::to_string(raw_payload)
            .map_err(|e| AppError::SerializationError(format!("Failed to serialize payload: {e}")))?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO form_responses (
                id, client_id, form_id, submission_id, raw_payload,
                processed_payload, submitted_at, completion_time_minutes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&response.id)
        .bind(client_id)
        .bind(form_id)
        .bind(submission_id)
        .bind(raw_json)
        .bind(processed_json)
        .bind(submitted_at)
        .bind(completion_time_minutes)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert form response: {e}")))?;

        if inserted.rows_affected() == 0 {
            // Lost a race with a concurrent insert of the same submission.
            return self
                .get_by_submission_id(submission_id)
                .await?
                .ok_or_else(|| {
                    AppError::DatabaseError(format!(
                        "Submission {submission_id} vanished after duplicate insert"
                    ))
                });
        }

        Ok(response)
    }

    pub async fn get_by_id(&self, id: &str) -> AppResult<Option<FormResponse>> {
        let row = sqlx::query("SELECT * FROM form_responses WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch form response: {e}")))?;

        row.as_ref().map(row_to_response).transpose()
    }

    pub async fn get_by_submission_id(
        &self,
        submission_id: &str,
    ) -> AppResult<Option<FormResponse>> {
        let row = sqlx::query("SELECT * FROM form_responses WHERE submission_id = $1")
            .bind(submission_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch form response: {e}")))?;

        row.as_ref().map(row_to_response).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_utils::connection::test_pool;

    fn sample_answers() -> Vec<FormAnswer> {
        vec![FormAnswer {
            question_id: "q1".to_string(),
            question: "How many invoices per month?".to_string(),
            answer: serde_json::json!(120),
        }]
    }

    #[tokio::test]
    async fn duplicate_submission_returns_first_row() {
        let pool = test_pool().await;
        let repo = FormResponseRepository::new(pool);
        let raw = serde_json::json!({"responses": []});

        let first = repo
            .insert_response("c-1", "form-9", "sub-1", &sample_answers(), &raw, None, None)
            .await
            .unwrap();
        let second = repo
            .insert_response("c-1", "form-9", "sub-1", &sample_answers(), &raw, None, None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn answers_round_trip() {
        let pool = test_pool().await;
        let repo = FormResponseRepository::new(pool);
        let raw = serde_json::json!({"responses": [{"id": "q1"}]});

        let stored = repo
            .insert_response("c-1", "form-9", "sub-2", &sample_answers(), &raw, Some(1000), Some(12.5))
            .await
            .unwrap();

        let fetched = repo.get_by_id(&stored.id).await.unwrap().unwrap();
        assert_eq!(fetched.answers.len(), 1);
        assert_eq!(fetched.answers[0].question_id, "q1");
        assert_eq!(fetched.completion_time_minutes, Some(12.5));
    }
}
