use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult, SerializableError};
use crate::jobs::processor_trait::ProcessorContext;
use crate::jobs::queue::QueueManager;
use crate::jobs::registry::ProcessorRegistry;
use crate::jobs::retry::calculate_retry_delay;
use crate::jobs::types::{EnqueueOptions, Job, JobPayload, NotificationPayload};
use crate::models::{JobPriority, NotificationType, StageQueue};
use crate::utils::get_timestamp;

/// Executes claimed jobs and owns the success/retry/escalation bookkeeping.
///
/// Chaining is explicit: a processor names the follow-up payload in its
/// result, the dispatcher enqueues it with `chained_from` set to the
/// finished job's id, so a gap in the chain is visible in the jobs table.
pub struct JobDispatcher {
    queue_manager: Arc<QueueManager>,
    registry: Arc<ProcessorRegistry>,
    context: ProcessorContext,
    config: Arc<EngineConfig>,
}

impl JobDispatcher {
    pub fn new(
        queue_manager: Arc<QueueManager>,
        registry: Arc<ProcessorRegistry>,
        context: ProcessorContext,
    ) -> Self {
        let config = context.config.clone();
        Self { queue_manager, registry, context, config }
    }

    /// Run one job end to end. The claim is a compare-and-swap, so a job
    /// offered to two workers runs exactly once; the loser skips silently.
    pub async fn dispatch(&self, job: Job) -> AppResult<()> {
        let repository = self.queue_manager.repository();

        if !repository.claim_job(&job.id).await? {
            debug!("Job {} was already claimed or finished; skipping", job.id);
            return Ok(());
        }
        // The claim consumed one attempt; the in-memory copy predates it.
        let attempt = job.attempt_count + 1;

        info!(
            "Job {} on {} starting (attempt {attempt}/{})",
            job.id, job.queue, job.max_attempts
        );

        let processor = self.registry.get(job.queue)?;
        let timeout = Duration::from_secs(self.config.job_timeout_secs);
        let outcome =
            match tokio::time::timeout(timeout, processor.process(&job, &self.context)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::TimeoutError(format!(
                    "Job {} exceeded the {}s execution cap",
                    job.id, self.config.job_timeout_secs
                ))),
            };

        match outcome {
            Ok(result) => {
                repository.mark_completed(&job.id, result.output.as_ref()).await?;
                info!("Job {} completed on attempt {attempt}", job.id);

                if let Some(chain) = result.chain {
                    let next = self
                        .queue_manager
                        .enqueue(
                            chain.payload,
                            EnqueueOptions {
                                priority: Some(chain.priority),
                                chained_from: Some(job.id.clone()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    info!("Job {} chained successor {} on {}", job.id, next.id, next.queue);
                }
                Ok(())
            }
            Err(e) => self.handle_failure(&job, attempt, e).await,
        }
    }

    async fn handle_failure(&self, job: &Job, attempt: u32, error: AppError) -> AppResult<()> {
        let repository = self.queue_manager.repository();
        let attempts_left = attempt < job.max_attempts;

        if error.is_retryable() && attempts_left {
            let settings = self.config.queue_settings(job.queue);
            let delay_ms = calculate_retry_delay(settings.backoff_base_ms, attempt);
            warn!(
                "Job {} attempt {attempt}/{} failed ({error}); retrying in {delay_ms}ms",
                job.id, job.max_attempts
            );
            repository
                .requeue_for_retry(&job.id, get_timestamp() + delay_ms as i64, &error.to_string())
                .await?;
            return Ok(());
        }

        if error.is_retryable() {
            error!(
                "ALERT: job {} on {} exhausted all {} attempt(s): {error}. Manual intervention required.",
                job.id, job.queue, job.max_attempts
            );
        } else {
            error!(
                "ALERT: job {} on {} failed with non-retryable error: {error}. Manual intervention required.",
                job.id, job.queue
            );
        }
        // Persist the structured classification so the attention queries can
        // distinguish exhausted-retryable from fatal failures.
        let detail = SerializableError::from(error);
        let message = serde_json::to_string(&detail).unwrap_or(detail.message);
        repository.mark_failed(&job.id, &message).await?;
        self.escalate(job).await;
        Ok(())
    }

    /// Best-effort operator notification for a permanently failed job.
    /// A failed notification job does not escalate through itself.
    async fn escalate(&self, job: &Job) {
        if job.queue == StageQueue::Notifications {
            return;
        }

        let enqueue = self
            .queue_manager
            .enqueue(
                JobPayload::Notification(NotificationPayload {
                    client_id: job.client_id().to_string(),
                    notification_type: NotificationType::PipelineFailed,
                }),
                EnqueueOptions {
                    priority: Some(JobPriority::High),
                    chained_from: Some(job.id.clone()),
                    ..Default::default()
                },
            )
            .await;

        if let Err(e) = enqueue {
            error!("Failed to enqueue escalation notice for job {}: {e}", job.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_utils::connection::test_pool;
    use crate::db_utils::{
        FormResponseRepository, JobRepository, StageOutputRepository, WorkflowRepository,
    };
    use crate::external::mock::{MockAiClient, MockNotifier, MockRenderer};
    use crate::jobs::types::{AiProcessingPayload, SopGenerationPayload};
    use crate::models::{Actor, ClientStatus, FormAnswer, IdentifiedProcessDraft, JobStatus};
    use crate::workflow::WorkflowStateMachine;

    struct Harness {
        dispatcher: JobDispatcher,
        queue_manager: Arc<QueueManager>,
        jobs: JobRepository,
        workflow: WorkflowStateMachine,
        form_responses: FormResponseRepository,
        stage_outputs: StageOutputRepository,
    }

    async fn harness(ai_client: MockAiClient) -> Harness {
        let pool = test_pool().await;
        let config = Arc::new(EngineConfig::default());

        let jobs = JobRepository::new(pool.clone());
        let workflow = WorkflowStateMachine::new(WorkflowRepository::new(pool.clone()));
        let stage_outputs = StageOutputRepository::new(pool.clone());
        let form_responses = FormResponseRepository::new(pool.clone());

        let context = ProcessorContext {
            config: config.clone(),
            jobs: jobs.clone(),
            workflow: workflow.clone(),
            stage_outputs: stage_outputs.clone(),
            form_responses: form_responses.clone(),
            ai_client: Arc::new(ai_client),
            renderer: Arc::new(MockRenderer::ok()),
            notifier: Arc::new(MockNotifier::default()),
        };

        let queue_manager = Arc::new(QueueManager::new(jobs.clone(), config));
        let dispatcher = JobDispatcher::new(
            queue_manager.clone(),
            Arc::new(ProcessorRegistry::standard()),
            context,
        );

        Harness { dispatcher, queue_manager, jobs, workflow, form_responses, stage_outputs }
    }

    async fn seed_client_with_response(h: &Harness) -> (String, String) {
        let client = h.workflow.create_client("Acme", Some("ops@acme.test")).await.unwrap();
        for (from, to, trigger) in [
            (ClientStatus::Created, ClientStatus::FormSent, "form.dispatched"),
            (ClientStatus::FormSent, ClientStatus::ResponsesReceived, "webhook.form_completed"),
        ] {
            h.workflow
                .request_transition(&client.id, from, to, trigger, &Actor::System, None)
                .await
                .unwrap();
        }

        let answers = vec![FormAnswer {
            question_id: "q1".to_string(),
            question: "Describe your invoicing".to_string(),
            answer: serde_json::json!("manual"),
        }];
        let response = h
            .form_responses
            .insert_response(
                &client.id,
                "form-1",
                "sub-1",
                &answers,
                &serde_json::json!({}),
                None,
                None,
            )
            .await
            .unwrap();

        (client.id, response.id)
    }

    async fn enqueue_ai_job(h: &Harness, client_id: &str, response_id: &str) -> Job {
        h.queue_manager
            .enqueue(
                JobPayload::AiProcessing(AiProcessingPayload {
                    client_id: client_id.to_string(),
                    form_response_id: response_id.to_string(),
                }),
                EnqueueOptions::default(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn successful_stage_completes_and_chains() {
        let h = harness(MockAiClient::returning(6)).await;
        let (client_id, response_id) = seed_client_with_response(&h).await;

        let job = enqueue_ai_job(&h, &client_id, &response_id).await;
        h.dispatcher.dispatch(job.clone()).await.unwrap();

        let row = h.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Completed);
        assert_eq!(row.attempt_count, 1);

        // Six processes clears the gate, so SOP generation was chained.
        let chained = h.queue_manager.dequeue(StageQueue::SopGeneration).await.unwrap();
        assert_eq!(chained.chained_from.as_deref(), Some(job.id.as_str()));

        assert_eq!(
            h.workflow.current_status(&client_id).await.unwrap(),
            ClientStatus::ProcessingAi
        );
        assert_eq!(h.stage_outputs.count_identified_processes(&client_id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn below_gate_flags_manual_review_instead_of_chaining_sops() {
        let h = harness(MockAiClient::returning(3)).await;
        let (client_id, response_id) = seed_client_with_response(&h).await;

        let job = enqueue_ai_job(&h, &client_id, &response_id).await;
        h.dispatcher.dispatch(job).await.unwrap();

        assert!(h.queue_manager.dequeue(StageQueue::SopGeneration).await.is_none());

        let notice = h.queue_manager.dequeue(StageQueue::Notifications).await.unwrap();
        match &notice.payload {
            JobPayload::Notification(p) => {
                assert_eq!(p.notification_type, NotificationType::ManualReviewRequired);
            }
            other => panic!("unexpected chained payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sop_generation_below_gate_fails_fatally_without_retry() {
        let h = harness(MockAiClient::returning(6)).await;
        let (client_id, response_id) = seed_client_with_response(&h).await;

        // Three processes on record; SOP generation requires five.
        let drafts: Vec<IdentifiedProcessDraft> = (0..3)
            .map(|i| IdentifiedProcessDraft {
                name: format!("Process {i}"),
                description: "Manual workflow".to_string(),
                confidence: 0.7,
            })
            .collect();
        h.stage_outputs
            .insert_identified_processes(&client_id, &response_id, &drafts)
            .await
            .unwrap();

        let job = h
            .queue_manager
            .enqueue(
                JobPayload::SopGeneration(SopGenerationPayload {
                    client_id: client_id.clone(),
                    ai_job_id: "upstream".to_string(),
                }),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
        h.dispatcher.dispatch(job.clone()).await.unwrap();

        // Fatal on the first attempt: retrying cannot produce more processes.
        let row = h.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.attempt_count, 1);
        assert_eq!(row.process_after, None);
        assert!(row.last_error.as_deref().unwrap_or("").contains("BUSINESS_RULE_ERROR"));
        assert!(!h.jobs.claim_job(&job.id).await.unwrap());
    }

    #[tokio::test]
    async fn transient_failure_requeues_with_backoff() {
        let h = harness(MockAiClient::failing_first(6, 1)).await;
        let (client_id, response_id) = seed_client_with_response(&h).await;

        let job = enqueue_ai_job(&h, &client_id, &response_id).await;
        let before = get_timestamp();
        h.dispatcher.dispatch(job.clone()).await.unwrap();

        let row = h.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Queued);
        assert_eq!(row.attempt_count, 1);
        assert!(row.last_error.is_some());

        // Backoff for the first retry is base * 2 (plus jitter).
        let base = EngineConfig::default()
            .queue_settings(StageQueue::AiProcessing)
            .backoff_base_ms as i64;
        let process_after = row.process_after.unwrap();
        assert!(process_after >= before + 2 * base);

        // Second dispatch succeeds.
        h.dispatcher.dispatch(row).await.unwrap();
        let row = h.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Completed);
        assert_eq!(row.attempt_count, 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_permanently_and_escalate() {
        let h = harness(MockAiClient::failing_first(6, 10)).await;
        let (client_id, response_id) = seed_client_with_response(&h).await;

        let job = h
            .queue_manager
            .enqueue(
                JobPayload::AiProcessing(AiProcessingPayload {
                    client_id: client_id.clone(),
                    form_response_id: response_id.clone(),
                }),
                EnqueueOptions { max_attempts: Some(2), ..Default::default() },
            )
            .await
            .unwrap();

        h.dispatcher.dispatch(job.clone()).await.unwrap();
        let row = h.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Queued);

        h.dispatcher.dispatch(row).await.unwrap();
        let row = h.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.attempt_count, 2);

        // No further claims are possible.
        assert!(!h.jobs.claim_job(&job.id).await.unwrap());

        // The failure surfaced both as an attention row and an escalation job.
        let attention = h.jobs.get_jobs_requiring_attention().await.unwrap();
        assert_eq!(attention.len(), 1);
        let depth = h.jobs.queue_depth(StageQueue::AiProcessing).await.unwrap();
        assert_eq!(depth.failed, 1);
        let escalation = h.queue_manager.dequeue(StageQueue::Notifications).await.unwrap();
        match &escalation.payload {
            JobPayload::Notification(p) => {
                assert_eq!(p.notification_type, NotificationType::PipelineFailed);
            }
            other => panic!("unexpected escalation payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let h = harness(MockAiClient::returning(6)).await;
        let client = h.workflow.create_client("Acme", None).await.unwrap();

        // No form response exists, so the processor hits NotFoundError.
        let job = h
            .queue_manager
            .enqueue(
                JobPayload::AiProcessing(AiProcessingPayload {
                    client_id: client.id.clone(),
                    form_response_id: "missing".to_string(),
                }),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        h.dispatcher.dispatch(job.clone()).await.unwrap();

        let row = h.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.attempt_count, 1);
    }

    #[tokio::test]
    async fn double_dispatch_runs_once() {
        let h = harness(MockAiClient::returning(6)).await;
        let (client_id, response_id) = seed_client_with_response(&h).await;

        let job = enqueue_ai_job(&h, &client_id, &response_id).await;
        h.dispatcher.dispatch(job.clone()).await.unwrap();
        // Second dispatch of the same snapshot loses the claim and is a no-op.
        h.dispatcher.dispatch(job.clone()).await.unwrap();

        let row = h.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(row.attempt_count, 1);
        assert_eq!(h.stage_outputs.count_identified_processes(&client_id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn manual_retry_restores_a_fresh_attempt_cycle() {
        let h = harness(MockAiClient::failing_first(6, 2)).await;
        let (client_id, response_id) = seed_client_with_response(&h).await;

        let job = h
            .queue_manager
            .enqueue(
                JobPayload::AiProcessing(AiProcessingPayload {
                    client_id,
                    form_response_id: response_id,
                }),
                EnqueueOptions { max_attempts: Some(1), ..Default::default() },
            )
            .await
            .unwrap();

        h.dispatcher.dispatch(job.clone()).await.unwrap();
        let row = h.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);

        assert!(h.jobs.reset_for_manual_retry(&job.id).await.unwrap());
        let row = h.jobs.get_job_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Queued);
        assert_eq!(row.attempt_count, 0);
    }
}
