use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::db_utils::{FormResponseRepository, StageOutputRepository, WebhookEventRepository};
use crate::error::{AppError, AppResult};
use crate::jobs::queue::QueueManager;
use crate::jobs::retry::calculate_retry_delay;
use crate::jobs::types::{
    AiProcessingPayload, EnqueueOptions, JobPayload, SopGenerationPayload,
};
use crate::models::{Actor, ClientStatus, JobStatus, StageQueue};
use crate::utils::get_timestamp;
use crate::webhooks::events::{AiCompletionEvent, AiOutcome, FormEvent};
use crate::workflow::WorkflowStateMachine;

/// How the adapter disposed of one delivery. Every variant is an HTTP-level
/// success; the sender must never be told to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// First delivery, side effects applied.
    Processed,
    /// Event id already seen; acknowledged without side effects.
    Replay,
    /// No internal record matches the event's correlation target;
    /// acknowledged and logged as an anomaly.
    Orphan,
    /// Recognized but carries no action for this engine (e.g. form.started).
    Acknowledged,
}

/// Upper bound on the in-memory replay cache. The durable ledger is
/// authoritative, so the cache can be dropped wholesale once it fills.
const SEEN_CACHE_MAX: usize = 10_000;

/// Converts at-least-once external deliveries into exactly-once internal
/// actions. The vendor event id is claimed in the webhook_events table
/// before any side effect runs, and stays in the `accepted` outcome until
/// processing reaches a terminal outcome; a delivery that failed
/// mid-processing is therefore re-processed when the sender retries, while a
/// finished one is acknowledged as a replay. The `seen_ids` `DashMap` only
/// short-cuts replays of finished events and is rebuilt empty on restart.
pub struct WebhookAdapter {
    events: WebhookEventRepository,
    form_responses: FormResponseRepository,
    stage_outputs: StageOutputRepository,
    workflow: WorkflowStateMachine,
    queue_manager: Arc<QueueManager>,
    config: Arc<EngineConfig>,
    seen_ids: DashMap<String, ()>,
}

impl WebhookAdapter {
    pub fn new(
        events: WebhookEventRepository,
        form_responses: FormResponseRepository,
        stage_outputs: StageOutputRepository,
        workflow: WorkflowStateMachine,
        queue_manager: Arc<QueueManager>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            events,
            form_responses,
            stage_outputs,
            workflow,
            queue_manager,
            config,
            seen_ids: DashMap::new(),
        }
    }

    /// Claim an event id for processing. Returns false for a replay of an
    /// event that already reached a terminal outcome; an id whose previous
    /// delivery failed mid-processing is claimed again.
    async fn claim(&self, event_id: &str, kind: &str, payload: &serde_json::Value) -> AppResult<bool> {
        if self.seen_ids.contains_key(event_id) {
            return Ok(false);
        }
        if self.events.insert_if_absent(event_id, kind, payload).await? {
            return Ok(true);
        }

        match self.events.get_outcome(event_id).await?.as_deref() {
            // Claimed earlier but never finished: the sender is retrying a
            // delivery we failed on. Side effects behind the claim are all
            // idempotent, so running them again is safe.
            Some("accepted") => Ok(true),
            _ => {
                self.remember(event_id);
                Ok(false)
            }
        }
    }

    /// Record the terminal outcome for an event and cache the id.
    async fn finish(&self, event_id: &str, outcome: &str) -> AppResult<()> {
        self.events.set_outcome(event_id, outcome).await?;
        self.remember(event_id);
        Ok(())
    }

    fn remember(&self, event_id: &str) {
        if self.seen_ids.len() >= SEEN_CACHE_MAX {
            self.seen_ids.clear();
        }
        self.seen_ids.insert(event_id.to_string(), ());
    }

    pub async fn ingest_form_event(&self, event: FormEvent) -> AppResult<IngestOutcome> {
        let payload = serde_json::to_value(&event)
            .map_err(|e| AppError::SerializationError(format!("Failed to serialize event: {e}")))?;
        let body = event.body();

        if !self.claim(&body.event_id, event.kind(), &payload).await? {
            debug!("Replay of event {}; acknowledging without action", body.event_id);
            return Ok(IngestOutcome::Replay);
        }

        let Some(client) = self.workflow.find_client_by_form(&body.form_id).await? else {
            warn!(
                "Orphaned event {}: no client is assigned form {}",
                body.event_id, body.form_id
            );
            self.finish(&body.event_id, "ignored_orphan").await?;
            return Ok(IngestOutcome::Orphan);
        };

        match event {
            FormEvent::Started(body) | FormEvent::Updated(body) => {
                debug!(
                    "Client {}: form {} progress event {} acknowledged",
                    client.id, body.form_id, body.event_id
                );
                self.finish(&body.event_id, "acknowledged").await?;
                Ok(IngestOutcome::Acknowledged)
            }
            FormEvent::Completed(body) => {
                let metadata = body.data.metadata.as_ref();
                let raw = serde_json::to_value(&body.data).map_err(|e| {
                    AppError::SerializationError(format!("Failed to serialize form data: {e}"))
                })?;

                // Unique submission_id makes this a no-op for a second
                // completion webhook carrying a fresh event id.
                let response = self
                    .form_responses
                    .insert_response(
                        &client.id,
                        &body.form_id,
                        &body.submission_id,
                        &body.data.responses,
                        &raw,
                        metadata.and_then(|m| m.submitted_at),
                        metadata.and_then(|m| m.completion_time_minutes),
                    )
                    .await?;

                match self
                    .workflow
                    .request_transition(
                        &client.id,
                        ClientStatus::FormSent,
                        ClientStatus::ResponsesReceived,
                        "webhook.form_completed",
                        &Actor::System,
                        None,
                    )
                    .await
                {
                    Ok(_) => {}
                    Err(AppError::StaleStateError(_)) | Err(AppError::BusinessRuleError(_)) => {
                        debug!(
                            "Client {} already moved past form_sent; continuing",
                            client.id
                        );
                    }
                    Err(e) => return Err(e),
                }

                if self
                    .queue_manager
                    .repository()
                    .has_active_job(&client.id, StageQueue::AiProcessing)
                    .await?
                {
                    info!(
                        "Client {} already has an active ai-processing job; not enqueueing another",
                        client.id
                    );
                } else {
                    self.queue_manager
                        .enqueue(
                            JobPayload::AiProcessing(AiProcessingPayload {
                                client_id: client.id.clone(),
                                form_response_id: response.id,
                            }),
                            EnqueueOptions::default(),
                        )
                        .await?;
                }

                self.finish(&body.event_id, "processed").await?;
                Ok(IngestOutcome::Processed)
            }
        }
    }

    pub async fn ingest_ai_event(&self, event: AiCompletionEvent) -> AppResult<IngestOutcome> {
        let dedup_key = event.dedup_key();
        let payload = serde_json::to_value(&event)
            .map_err(|e| AppError::SerializationError(format!("Failed to serialize event: {e}")))?;

        if !self.claim(&dedup_key, event.kind(), &payload).await? {
            debug!("Replay of AI callback {dedup_key}; acknowledging without action");
            return Ok(IngestOutcome::Replay);
        }

        let repository = self.queue_manager.repository();
        let Some(job) = repository.get_job_by_id(&event.job_id).await? else {
            warn!("Orphaned AI callback for unknown job {}", event.job_id);
            self.finish(&dedup_key, "ignored_orphan").await?;
            return Ok(IngestOutcome::Orphan);
        };

        let JobPayload::AiProcessing(job_payload) = &job.payload else {
            warn!(
                "AI callback for job {} which is not an ai-processing job; ignoring",
                job.id
            );
            self.finish(&dedup_key, "ignored_orphan").await?;
            return Ok(IngestOutcome::Orphan);
        };
        let client_id = job_payload.client_id.clone();
        let form_response_id = job_payload.form_response_id.clone();

        match event.outcome {
            AiOutcome::Completed { results } => {
                let existing = self.stage_outputs.count_identified_processes(&client_id).await?;
                let count = if existing > 0 {
                    existing as usize
                } else {
                    self.stage_outputs
                        .insert_identified_processes(
                            &client_id,
                            &form_response_id,
                            &results.identified_processes,
                        )
                        .await?
                        .len()
                };

                repository
                    .mark_completed(
                        &job.id,
                        Some(&serde_json::json!({ "identifiedProcesses": count })),
                    )
                    .await?;

                if count >= self.config.min_processes_to_advance {
                    match self
                        .workflow
                        .request_transition(
                            &client_id,
                            ClientStatus::ProcessingAi,
                            ClientStatus::SopsGenerated,
                            "webhook.ai_completed",
                            &Actor::System,
                            None,
                        )
                        .await
                    {
                        Ok(_) => {}
                        Err(AppError::StaleStateError(_)) => {
                            debug!("Client {client_id} status already advanced; continuing");
                        }
                        Err(e) => return Err(e),
                    }

                    if !repository.has_active_job(&client_id, StageQueue::SopGeneration).await? {
                        self.queue_manager
                            .enqueue(
                                JobPayload::SopGeneration(SopGenerationPayload {
                                    client_id: client_id.clone(),
                                    ai_job_id: job.id.clone(),
                                }),
                                EnqueueOptions {
                                    chained_from: Some(job.id.clone()),
                                    ..Default::default()
                                },
                            )
                            .await?;
                    }
                } else {
                    info!(
                        "Client {client_id}: AI callback reported {count} process(es), below the minimum of {}; awaiting manual action",
                        self.config.min_processes_to_advance
                    );
                }
            }
            AiOutcome::Failed { error } => {
                // Route through the normal retry/backoff bookkeeping rather
                // than failing the job out of band.
                if job.status != JobStatus::Running {
                    warn!(
                        "AI failure callback for job {} in state {}; nothing to do",
                        job.id, job.status
                    );
                } else if job.attempts_remaining() {
                    let settings = self.config.queue_settings(job.queue);
                    let delay_ms = calculate_retry_delay(settings.backoff_base_ms, job.attempt_count);
                    warn!(
                        "AI callback failed for job {} ({}); retrying in {delay_ms}ms",
                        job.id, error.message
                    );
                    repository
                        .requeue_for_retry(&job.id, get_timestamp() + delay_ms as i64, &error.message)
                        .await?;
                } else {
                    warn!(
                        "AI callback failed for job {} with no attempts left: {}",
                        job.id, error.message
                    );
                    repository.mark_failed(&job.id, &error.message).await?;
                }
            }
        }

        self.finish(&dedup_key, "processed").await?;
        Ok(IngestOutcome::Processed)
    }
}
