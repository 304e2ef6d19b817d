use async_trait::async_trait;
use log::{info, warn};
use serde_json::json;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::jobs::processor_trait::{ProcessorContext, StageProcessor};
use crate::jobs::processors::advance_once;
use crate::jobs::types::{
    Job, JobPayload, JobProcessResult, NotificationPayload, SopGenerationPayload,
};
use crate::models::{ClientStatus, NotificationType, StageQueue};

/// Runs the AI analysis over a stored form submission and persists the
/// processes it identifies. Chains into SOP generation when enough processes
/// were found; otherwise flags the client for manual review.
pub struct AiProcessingProcessor;

#[async_trait]
impl StageProcessor for AiProcessingProcessor {
    fn name(&self) -> &'static str {
        "ai-processing"
    }

    fn queue(&self) -> StageQueue {
        StageQueue::AiProcessing
    }

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> AppResult<JobProcessResult> {
        let JobPayload::AiProcessing(payload) = &job.payload else {
            return Err(AppError::ValidationError(format!(
                "Job {} carries a non-AI payload",
                job.id
            )));
        };

        advance_once(ctx, &payload.client_id, ClientStatus::ResponsesReceived, "job.ai_processing")
            .await?;

        let response = ctx
            .form_responses
            .get_by_id(&payload.form_response_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFoundError(format!(
                    "Form response {} not found",
                    payload.form_response_id
                ))
            })?;

        // A previous attempt may have persisted its results before the
        // worker died. Reuse them instead of calling the service again.
        let existing = ctx
            .stage_outputs
            .count_identified_processes(&payload.client_id)
            .await?;
        let process_count = if existing > 0 {
            info!(
                "Client {} already has {existing} identified process(es); skipping analysis",
                payload.client_id
            );
            existing as usize
        } else {
            let timeout = Duration::from_secs(ctx.config.ai_call_timeout_secs);
            let drafts = tokio::time::timeout(
                timeout,
                ctx.ai_client.analyze_form_response(&response),
            )
            .await
            .map_err(|_| {
                AppError::TimeoutError(format!(
                    "AI analysis exceeded {}s for job {}",
                    ctx.config.ai_call_timeout_secs, job.id
                ))
            })??;

            let stored = ctx
                .stage_outputs
                .insert_identified_processes(&payload.client_id, &response.id, &drafts)
                .await?;
            stored.len()
        };

        let output = json!({ "identifiedProcesses": process_count });
        let result = JobProcessResult::success(job.id.clone(), output);

        if process_count >= ctx.config.min_processes_to_advance {
            Ok(result.with_chain(JobPayload::SopGeneration(SopGenerationPayload {
                client_id: payload.client_id.clone(),
                ai_job_id: job.id.clone(),
            })))
        } else {
            warn!(
                "Client {} yielded only {process_count} process(es), below the minimum of {}; flagging for manual review",
                payload.client_id, ctx.config.min_processes_to_advance
            );
            Ok(result.with_chain(JobPayload::Notification(NotificationPayload {
                client_id: payload.client_id.clone(),
                notification_type: NotificationType::ManualReviewRequired,
            })))
        }
    }
}
