use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::utils::get_timestamp;

/// Idempotency ledger for inbound webhook deliveries, keyed by the vendor's
/// event id. The first delivery claims the id; replays see it already taken.
/// A claim starts in the `accepted` outcome and only becomes terminal once
/// processing finishes, so a delivery that failed mid-processing can be told
/// apart from one that completed.
#[derive(Debug, Clone)]
pub struct WebhookEventRepository {
    pool: Arc<SqlitePool>,
}

impl WebhookEventRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Record an event id if it has not been seen before. Returns true when
    /// this call claimed the id (first delivery), false for a replay.
    pub async fn insert_if_absent(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> AppResult<bool> {
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| AppError::SerializationError(format!("Failed to serialize event: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO webhook_events (event_id, event_type, payload, outcome, received_at)
            VALUES ($1, $2, $3, 'accepted', $4)
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(payload_json)
        .bind(get_timestamp())
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to record webhook event: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    /// Update the recorded outcome for an already-claimed event id, e.g.
    /// `ignored_orphan` or `processed`.
    pub async fn set_outcome(&self, event_id: &str, outcome: &str) -> AppResult<()> {
        sqlx::query("UPDATE webhook_events SET outcome = $1 WHERE event_id = $2")
            .bind(outcome)
            .bind(event_id)
            .execute(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to update event outcome: {e}")))?;
        Ok(())
    }

    pub async fn get_outcome(&self, event_id: &str) -> AppResult<Option<String>> {
        let row = sqlx::query("SELECT outcome FROM webhook_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch event outcome: {e}")))?;

        Ok(row.map(|r| r.try_get::<String, _>("outcome")).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_utils::connection::test_pool;

    #[tokio::test]
    async fn first_delivery_claims_replay_does_not() {
        let pool = test_pool().await;
        let repo = WebhookEventRepository::new(pool);
        let payload = serde_json::json!({"eventId": "evt-1"});

        assert!(repo.insert_if_absent("evt-1", "form.completed", &payload).await.unwrap());
        assert!(!repo.insert_if_absent("evt-1", "form.completed", &payload).await.unwrap());
    }

    #[tokio::test]
    async fn distinct_event_ids_are_independent() {
        let pool = test_pool().await;
        let repo = WebhookEventRepository::new(pool);
        let payload = serde_json::json!({});

        assert!(repo.insert_if_absent("evt-1", "form.started", &payload).await.unwrap());
        assert!(repo.insert_if_absent("evt-2", "form.started", &payload).await.unwrap());
        repo.set_outcome("evt-2", "ignored_orphan").await.unwrap();
    }

    #[tokio::test]
    async fn outcome_starts_accepted_and_tracks_updates() {
        let pool = test_pool().await;
        let repo = WebhookEventRepository::new(pool);
        let payload = serde_json::json!({});

        repo.insert_if_absent("evt-1", "form.completed", &payload).await.unwrap();
        assert_eq!(repo.get_outcome("evt-1").await.unwrap().as_deref(), Some("accepted"));

        repo.set_outcome("evt-1", "processed").await.unwrap();
        assert_eq!(repo.get_outcome("evt-1").await.unwrap().as_deref(), Some("processed"));

        assert_eq!(repo.get_outcome("never-seen").await.unwrap(), None);
    }
}
