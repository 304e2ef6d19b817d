use log::{info, warn};

use crate::db_utils::WorkflowRepository;
use crate::error::{AppError, AppResult};
use crate::models::{Actor, Client, ClientStatus, WorkflowTransition};

/// Guards client status changes. System and user actors may only advance one
/// step along the canonical sequence; administrative actors may move a client
/// anywhere, including backward, with the move recorded like any other.
///
/// The actual compare-and-swap happens in the repository, so two concurrent
/// requests for the same step resolve to one winner and one
/// `StaleStateError` without any locking here.
#[derive(Debug, Clone)]
pub struct WorkflowStateMachine {
    repository: WorkflowRepository,
}

impl WorkflowStateMachine {
    pub fn new(repository: WorkflowRepository) -> Self {
        Self { repository }
    }

    pub async fn create_client(&self, name: &str, email: Option<&str>) -> AppResult<Client> {
        self.repository.create_client(name, email).await
    }

    pub async fn get_client(&self, client_id: &str) -> AppResult<Client> {
        self.repository
            .get_client(client_id)
            .await?
            .ok_or_else(|| AppError::NotFoundError(format!("Client {client_id} not found")))
    }

    pub async fn assign_form(&self, client_id: &str, form_id: &str) -> AppResult<()> {
        self.repository.assign_form(client_id, form_id).await
    }

    pub async fn find_client_by_form(&self, form_id: &str) -> AppResult<Option<Client>> {
        self.repository.get_client_by_form_id(form_id).await
    }

    pub async fn current_status(&self, client_id: &str) -> AppResult<ClientStatus> {
        Ok(self.get_client(client_id).await?.current_status)
    }

    /// Request a transition from `expected_current` to `new_status`.
    ///
    /// Fails with `BusinessRuleError` when the requested move is not allowed
    /// for the actor, and `StaleStateError` when the client is no longer in
    /// `expected_current`. Neither failure writes anything.
    pub async fn request_transition(
        &self,
        client_id: &str,
        expected_current: ClientStatus,
        new_status: ClientStatus,
        trigger_event: &str,
        actor: &Actor,
        context: Option<&serde_json::Value>,
    ) -> AppResult<WorkflowTransition> {
        if actor.is_administrative() {
            warn!(
                "Administrative override: client {client_id} {expected_current} -> {new_status} by {}",
                actor.as_db_string()
            );
        } else {
            if expected_current.is_terminal() {
                return Err(AppError::BusinessRuleError(format!(
                    "Client {client_id} is {expected_current}; only an administrator may reopen it"
                )));
            }
            if expected_current.canonical_next() != Some(new_status) {
                return Err(AppError::BusinessRuleError(format!(
                    "Transition {expected_current} -> {new_status} is not the canonical next step"
                )));
            }
        }

        let transition = self
            .repository
            .apply_transition(client_id, expected_current, new_status, trigger_event, actor, context)
            .await?;

        info!(
            "Client {client_id} advanced {expected_current} -> {new_status} ({trigger_event})"
        );
        Ok(transition)
    }

    pub async fn get_history(&self, client_id: &str) -> AppResult<Vec<WorkflowTransition>> {
        self.repository.get_transition_history(client_id).await
    }

    /// Audit helper: replays the log and checks it lands on the stored status.
    pub async fn verify_log_consistency(&self, client_id: &str) -> AppResult<bool> {
        let replayed = self.repository.replay_status(client_id).await?;
        let stored = self.current_status(client_id).await?;
        Ok(replayed == stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_utils::connection::test_pool;

    async fn machine() -> WorkflowStateMachine {
        WorkflowStateMachine::new(WorkflowRepository::new(test_pool().await))
    }

    #[tokio::test]
    async fn system_actor_cannot_skip_steps() {
        let machine = machine().await;
        let client = machine.create_client("Acme", None).await.unwrap();

        let err = machine
            .request_transition(
                &client.id,
                ClientStatus::Created,
                ClientStatus::ProposalReady,
                "shortcut",
                &Actor::System,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BusinessRuleError(_)));

        // Nothing was written.
        assert_eq!(
            machine.current_status(&client.id).await.unwrap(),
            ClientStatus::Created
        );
    }

    #[tokio::test]
    async fn admin_may_move_backward() {
        let machine = machine().await;
        let client = machine.create_client("Acme", None).await.unwrap();

        machine
            .request_transition(
                &client.id,
                ClientStatus::Created,
                ClientStatus::FormSent,
                "form.dispatched",
                &Actor::System,
                None,
            )
            .await
            .unwrap();

        let admin = Actor::Admin("ops".to_string());
        machine
            .request_transition(
                &client.id,
                ClientStatus::FormSent,
                ClientStatus::Created,
                "manual.reset",
                &admin,
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            machine.current_status(&client.id).await.unwrap(),
            ClientStatus::Created
        );
        // Both moves are in the log.
        assert_eq!(machine.get_history(&client.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn closed_is_terminal_for_system_actors() {
        let machine = machine().await;
        let client = machine.create_client("Acme", None).await.unwrap();

        let mut status = ClientStatus::Created;
        while let Some(next) = status.canonical_next() {
            machine
                .request_transition(&client.id, status, next, "advance", &Actor::System, None)
                .await
                .unwrap();
            status = next;
        }
        assert_eq!(status, ClientStatus::Closed);

        let err = machine
            .request_transition(
                &client.id,
                ClientStatus::Closed,
                ClientStatus::Created,
                "reopen",
                &Actor::User("u-1".to_string()),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BusinessRuleError(_)));

        assert!(machine.verify_log_consistency(&client.id).await.unwrap());
    }
}
