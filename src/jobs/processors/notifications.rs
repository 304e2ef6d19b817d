use async_trait::async_trait;
use log::warn;
use serde_json::json;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::external::NotificationMessage;
use crate::jobs::processor_trait::{ProcessorContext, StageProcessor};
use crate::jobs::processors::advance_once;
use crate::jobs::types::{Job, JobPayload, JobProcessResult};
use crate::models::{ClientStatus, NotificationType, StageQueue};

/// Delivers an outbound notification and records the delivery. Sending the
/// proposal-ready notice also advances the client to `proposal_sent`.
pub struct NotificationProcessor;

fn compose(notification_type: NotificationType, client_name: &str) -> NotificationMessage {
    let (subject, body) = match notification_type {
        NotificationType::ProposalReady => (
            format!("Your automation proposal is ready, {client_name}"),
            "Your tailored automation proposal has been generated and is attached.".to_string(),
        ),
        NotificationType::ManualReviewRequired => (
            format!("Diagnostic review needed for {client_name}"),
            "The automated analysis found too few processes to proceed; a consultant will review the submission.".to_string(),
        ),
        NotificationType::PipelineFailed => (
            format!("Processing issue for {client_name}"),
            "An automated step failed permanently and needs operator attention.".to_string(),
        ),
    };
    NotificationMessage { notification_type, subject, body }
}

#[async_trait]
impl StageProcessor for NotificationProcessor {
    fn name(&self) -> &'static str {
        "notifications"
    }

    fn queue(&self) -> StageQueue {
        StageQueue::Notifications
    }

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> AppResult<JobProcessResult> {
        let JobPayload::Notification(payload) = &job.payload else {
            return Err(AppError::ValidationError(format!(
                "Job {} carries a non-notification payload",
                job.id
            )));
        };

        let client = ctx.workflow.get_client(&payload.client_id).await?;

        let Some(recipient) = client.email.clone() else {
            warn!(
                "Client {} has no email on file; recording {} as skipped",
                client.id, payload.notification_type
            );
            ctx.stage_outputs
                .insert_notification_record(
                    &client.id,
                    payload.notification_type,
                    ctx.notifier.channel(),
                    "skipped_no_recipient",
                )
                .await?;
            return Ok(JobProcessResult::success(
                job.id.clone(),
                json!({ "delivered": false, "reason": "no_recipient" }),
            ));
        };

        let message = compose(payload.notification_type, &client.name);
        let timeout = Duration::from_secs(ctx.config.notify_timeout_secs);
        tokio::time::timeout(timeout, ctx.notifier.send(&recipient, &message))
            .await
            .map_err(|_| {
                AppError::TimeoutError(format!(
                    "Notification send exceeded {}s for client {}",
                    ctx.config.notify_timeout_secs, client.id
                ))
            })??;

        ctx.stage_outputs
            .insert_notification_record(
                &client.id,
                payload.notification_type,
                ctx.notifier.channel(),
                "sent",
            )
            .await?;

        if payload.notification_type == NotificationType::ProposalReady {
            advance_once(ctx, &client.id, ClientStatus::ProposalReady, "job.notification").await?;
        }

        Ok(JobProcessResult::success(
            job.id.clone(),
            json!({ "delivered": true, "channel": ctx.notifier.channel() }),
        ))
    }
}
