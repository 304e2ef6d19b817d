use log::{debug, info};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::{Actor, Client, ClientStatus, WorkflowTransition};
use crate::utils::{get_timestamp, new_id};

/// Persistence for clients and their append-only transition log. Status
/// changes go through `apply_transition`, which performs the conditional
/// update and the log insert in one transaction.
#[derive(Debug, Clone)]
pub struct WorkflowRepository {
    pool: Arc<SqlitePool>,
}

fn row_to_client(row: &SqliteRow) -> AppResult<Client> {
    let status_str: String = row.try_get("current_status")?;
    let current_status = ClientStatus::from_str(&status_str)
        .map_err(|e| AppError::DatabaseError(format!("Corrupt status column: {e}")))?;

    Ok(Client {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        form_id: row.try_get("form_id")?,
        current_status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_transition(row: &SqliteRow) -> AppResult<WorkflowTransition> {
    let from_str: String = row.try_get("from_status")?;
    let to_str: String = row.try_get("to_status")?;
    let actor_str: String = row.try_get("actor")?;
    let context_json: Option<String> = row.try_get("context")?;

    let context = context_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| AppError::DatabaseError(format!("Corrupt context column: {e}")))?;

    Ok(WorkflowTransition {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        from_status: ClientStatus::from_str(&from_str)
            .map_err(|e| AppError::DatabaseError(format!("Corrupt from_status column: {e}")))?,
        to_status: ClientStatus::from_str(&to_str)
            .map_err(|e| AppError::DatabaseError(format!("Corrupt to_status column: {e}")))?,
        trigger_event: row.try_get("trigger_event")?,
        actor: Actor::from_db_string(&actor_str),
        context,
        created_at: row.try_get("created_at")?,
    })
}

impl WorkflowRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub async fn create_client(&self, name: &str, email: Option<&str>) -> AppResult<Client> {
        let now = get_timestamp();
        let client = Client {
            id: new_id(),
            name: name.to_string(),
            email: email.map(str::to_string),
            form_id: None,
            current_status: ClientStatus::Created,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO clients (id, name, email, current_status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(&client.email)
        .bind(client.current_status.to_string())
        .bind(client.created_at)
        .bind(client.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to create client: {e}")))?;

        info!("Created client {} ({})", client.id, client.name);
        Ok(client)
    }

    /// Record which external diagnostic form belongs to this client, so
    /// inbound form webhooks can be correlated.
    pub async fn assign_form(&self, client_id: &str, form_id: &str) -> AppResult<()> {
        let result = sqlx::query("UPDATE clients SET form_id = $1, updated_at = $2 WHERE id = $3")
            .bind(form_id)
            .bind(get_timestamp())
            .bind(client_id)
            .execute(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to assign form: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFoundError(format!("Client {client_id} not found")));
        }
        Ok(())
    }

    pub async fn get_client_by_form_id(&self, form_id: &str) -> AppResult<Option<Client>> {
        let row = sqlx::query("SELECT * FROM clients WHERE form_id = $1")
            .bind(form_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch client by form: {e}")))?;

        row.as_ref().map(row_to_client).transpose()
    }

    pub async fn get_client(&self, client_id: &str) -> AppResult<Option<Client>> {
        let row = sqlx::query("SELECT * FROM clients WHERE id = $1")
            .bind(client_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch client: {e}")))?;

        row.as_ref().map(row_to_client).transpose()
    }

    /// Conditionally advance a client's status and append the transition
    /// record, atomically. The UPDATE carries the expected current status in
    /// its WHERE clause; zero rows affected means another writer got there
    /// first and the caller receives `StaleStateError` with nothing written.
    pub async fn apply_transition(
        &self,
        client_id: &str,
        expected_current: ClientStatus,
        new_status: ClientStatus,
        trigger_event: &str,
        actor: &Actor,
        context: Option<&serde_json::Value>,
    ) -> AppResult<WorkflowTransition> {
        let now = get_timestamp();
        let context_json = context
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::SerializationError(format!("Failed to serialize context: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {e}")))?;

        let result = sqlx::query(
            "UPDATE clients SET current_status = $1, updated_at = $2 WHERE id = $3 AND current_status = $4",
        )
        .bind(new_status.to_string())
        .bind(now)
        .bind(client_id)
        .bind(expected_current.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to update client status: {e}")))?;

        if result.rows_affected() == 0 {
            // Rolls back implicitly when tx drops.
            let actual = sqlx::query("SELECT current_status FROM clients WHERE id = $1")
                .bind(client_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to read client status: {e}")))?;

            return match actual {
                Some(row) => {
                    let current: String = row.try_get("current_status")?;
                    Err(AppError::StaleStateError(format!(
                        "Client {client_id} is '{current}', expected '{expected_current}'"
                    )))
                }
                None => Err(AppError::NotFoundError(format!("Client {client_id} not found"))),
            };
        }

        let transition = WorkflowTransition {
            id: new_id(),
            client_id: client_id.to_string(),
            from_status: expected_current,
            to_status: new_status,
            trigger_event: trigger_event.to_string(),
            actor: actor.clone(),
            context: context.cloned(),
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO workflow_transitions (
                id, client_id, from_status, to_status, trigger_event, actor, context, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&transition.id)
        .bind(&transition.client_id)
        .bind(transition.from_status.to_string())
        .bind(transition.to_status.to_string())
        .bind(&transition.trigger_event)
        .bind(actor.as_db_string())
        .bind(context_json)
        .bind(transition.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to record transition: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit transition: {e}")))?;

        debug!(
            "Client {client_id}: {expected_current} -> {new_status} ({trigger_event})"
        );
        Ok(transition)
    }

    /// Full transition history for one client, oldest first. Ordered by the
    /// table's rowid: `created_at` only has millisecond resolution, so two
    /// quick transitions can share a timestamp, and the insertion sequence is
    /// what replay depends on.
    pub async fn get_transition_history(
        &self,
        client_id: &str,
    ) -> AppResult<Vec<WorkflowTransition>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_transitions WHERE client_id = $1 ORDER BY rowid ASC",
        )
        .bind(client_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch transitions: {e}")))?;

        rows.iter().map(row_to_transition).collect()
    }

    /// Replay the transition log from `created` and return where it lands.
    /// Used to audit that the log and the materialized status agree.
    pub async fn replay_status(&self, client_id: &str) -> AppResult<ClientStatus> {
        let history = self.get_transition_history(client_id).await?;
        let mut status = ClientStatus::Created;
        for transition in &history {
            if transition.from_status != status {
                return Err(AppError::InternalError(format!(
                    "Transition log for client {client_id} is discontinuous at {}",
                    transition.id
                )));
            }
            status = transition.to_status;
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_utils::connection::test_pool;

    #[tokio::test]
    async fn transition_advances_status_and_appends_log() {
        let pool = test_pool().await;
        let repo = WorkflowRepository::new(pool);
        let client = repo.create_client("Acme", Some("ops@acme.test")).await.unwrap();

        let transition = repo
            .apply_transition(
                &client.id,
                ClientStatus::Created,
                ClientStatus::FormSent,
                "form.dispatched",
                &Actor::System,
                None,
            )
            .await
            .unwrap();

        assert_eq!(transition.from_status, ClientStatus::Created);
        assert_eq!(transition.to_status, ClientStatus::FormSent);

        let reloaded = repo.get_client(&client.id).await.unwrap().unwrap();
        assert_eq!(reloaded.current_status, ClientStatus::FormSent);

        let history = repo.get_transition_history(&client.id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn stale_expectation_writes_nothing() {
        let pool = test_pool().await;
        let repo = WorkflowRepository::new(pool);
        let client = repo.create_client("Acme", None).await.unwrap();

        let err = repo
            .apply_transition(
                &client.id,
                ClientStatus::FormSent,
                ClientStatus::ResponsesReceived,
                "webhook.form_completed",
                &Actor::System,
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::StaleStateError(_)));

        let reloaded = repo.get_client(&client.id).await.unwrap().unwrap();
        assert_eq!(reloaded.current_status, ClientStatus::Created);
        assert!(repo.get_transition_history(&client.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replay_reconstructs_current_status() {
        let pool = test_pool().await;
        let repo = WorkflowRepository::new(pool);
        let client = repo.create_client("Acme", None).await.unwrap();

        let steps = [
            (ClientStatus::Created, ClientStatus::FormSent, "form.dispatched"),
            (ClientStatus::FormSent, ClientStatus::ResponsesReceived, "webhook.form_completed"),
            (ClientStatus::ResponsesReceived, ClientStatus::ProcessingAi, "job.ai_processing"),
        ];
        for (from, to, trigger) in steps {
            repo.apply_transition(&client.id, from, to, trigger, &Actor::System, None)
                .await
                .unwrap();
        }

        let replayed = repo.replay_status(&client.id).await.unwrap();
        let reloaded = repo.get_client(&client.id).await.unwrap().unwrap();
        assert_eq!(replayed, reloaded.current_status);
        assert_eq!(replayed, ClientStatus::ProcessingAi);
    }

    #[tokio::test]
    async fn same_millisecond_transitions_replay_in_insertion_order() {
        let pool = test_pool().await;
        let repo = WorkflowRepository::new(pool.clone());
        let client = repo.create_client("Acme", None).await.unwrap();

        let steps = [
            (ClientStatus::Created, ClientStatus::FormSent),
            (ClientStatus::FormSent, ClientStatus::ResponsesReceived),
            (ClientStatus::ResponsesReceived, ClientStatus::ProcessingAi),
            (ClientStatus::ProcessingAi, ClientStatus::SopsGenerated),
        ];
        for (from, to) in steps {
            repo.apply_transition(&client.id, from, to, "advance", &Actor::System, None)
                .await
                .unwrap();
        }

        // Collapse every timestamp onto one millisecond; the random UUIDs
        // would shuffle a timestamp-then-id ordering.
        sqlx::query("UPDATE workflow_transitions SET created_at = 1000")
            .execute(&*pool)
            .await
            .unwrap();

        let replayed = repo.replay_status(&client.id).await.unwrap();
        assert_eq!(replayed, ClientStatus::SopsGenerated);

        let history = repo.get_transition_history(&client.id).await.unwrap();
        for (transition, (from, to)) in history.iter().zip(steps) {
            assert_eq!(transition.from_status, from);
            assert_eq!(transition.to_status, to);
        }
    }

    #[tokio::test]
    async fn missing_client_is_not_found() {
        let pool = test_pool().await;
        let repo = WorkflowRepository::new(pool);

        let err = repo
            .apply_transition(
                "nope",
                ClientStatus::Created,
                ClientStatus::FormSent,
                "form.dispatched",
                &Actor::System,
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFoundError(_)));
    }
}
