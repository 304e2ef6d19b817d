use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::jobs::processor_trait::{ProcessorContext, StageProcessor};
use crate::jobs::types::{Job, JobPayload, JobProcessResult, NotificationPayload};
use crate::models::{ArtifactType, NotificationType, StageQueue};

/// Renders an artifact (proposal or single SOP) into a stored PDF. Rendering
/// a proposal chains the client-facing notification.
pub struct PdfGenerationProcessor;

#[async_trait]
impl StageProcessor for PdfGenerationProcessor {
    fn name(&self) -> &'static str {
        "pdf-generation"
    }

    fn queue(&self) -> StageQueue {
        StageQueue::PdfGeneration
    }

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> AppResult<JobProcessResult> {
        let JobPayload::PdfGeneration(payload) = &job.payload else {
            return Err(AppError::ValidationError(format!(
                "Job {} carries a non-PDF payload",
                job.id
            )));
        };

        let (title, body) = match payload.artifact_type {
            ArtifactType::Proposal => {
                let proposal = ctx
                    .stage_outputs
                    .get_proposal(&payload.artifact_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFoundError(format!(
                            "Proposal {} not found",
                            payload.artifact_id
                        ))
                    })?;
                (proposal.title, proposal.body)
            }
            ArtifactType::Sop => {
                let sops = ctx
                    .stage_outputs
                    .get_sops_by_ids(std::slice::from_ref(&payload.artifact_id))
                    .await?;
                let sop = sops.into_iter().next().ok_or_else(|| {
                    AppError::NotFoundError(format!("SOP {} not found", payload.artifact_id))
                })?;
                (sop.title, sop.content)
            }
        };

        let timeout = Duration::from_secs(ctx.config.render_timeout_secs);
        let storage_ref = tokio::time::timeout(timeout, ctx.renderer.render_pdf(&title, &body))
            .await
            .map_err(|_| {
                AppError::TimeoutError(format!(
                    "Rendering exceeded {}s for artifact {}",
                    ctx.config.render_timeout_secs, payload.artifact_id
                ))
            })??;

        let document = ctx
            .stage_outputs
            .insert_document(&payload.client_id, payload.artifact_type, &payload.artifact_id, &storage_ref)
            .await?;

        let result = JobProcessResult::success(
            job.id.clone(),
            json!({ "documentId": document.id, "storageRef": storage_ref }),
        );

        match payload.artifact_type {
            ArtifactType::Proposal => {
                Ok(result.with_chain(JobPayload::Notification(NotificationPayload {
                    client_id: payload.client_id.clone(),
                    notification_type: NotificationType::ProposalReady,
                })))
            }
            ArtifactType::Sop => Ok(result),
        }
    }
}
