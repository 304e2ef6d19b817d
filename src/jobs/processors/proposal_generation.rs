use async_trait::async_trait;
use serde_json::json;
use std::fmt::Write as _;

use crate::error::{AppError, AppResult};
use crate::jobs::processor_trait::{ProcessorContext, StageProcessor};
use crate::jobs::processors::advance_once;
use crate::jobs::types::{Job, JobPayload, JobProcessResult, PdfGenerationPayload};
use crate::models::{ArtifactType, ClientStatus, StageQueue};

/// Assembles a commercial proposal from the approved SOPs and chains the PDF
/// rendering stage.
pub struct ProposalGenerationProcessor;

#[async_trait]
impl StageProcessor for ProposalGenerationProcessor {
    fn name(&self) -> &'static str {
        "proposal-generation"
    }

    fn queue(&self) -> StageQueue {
        StageQueue::ProposalGeneration
    }

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> AppResult<JobProcessResult> {
        let JobPayload::ProposalGeneration(payload) = &job.payload else {
            return Err(AppError::ValidationError(format!(
                "Job {} carries a non-proposal payload",
                job.id
            )));
        };

        if payload.approved_sop_ids.is_empty() {
            return Err(AppError::ValidationError(format!(
                "Proposal for client {} requested without any approved SOPs",
                payload.client_id
            )));
        }

        let sops = ctx.stage_outputs.get_sops_by_ids(&payload.approved_sop_ids).await?;
        let client = ctx.workflow.get_client(&payload.client_id).await?;

        let title = format!("Automation proposal for {}", client.name);
        let mut body = format!(
            "Based on our diagnostic, we propose automating the following {} procedure(s):\n\n",
            sops.len()
        );
        for sop in &sops {
            let _ = writeln!(body, "- {}", sop.title);
        }

        let proposal = ctx
            .stage_outputs
            .insert_proposal(&payload.client_id, &title, &body, &payload.approved_sop_ids)
            .await?;

        advance_once(ctx, &payload.client_id, ClientStatus::SopsGenerated, "job.proposal_generation")
            .await?;

        Ok(JobProcessResult::success(
            job.id.clone(),
            json!({ "proposalId": proposal.id, "sopCount": sops.len() }),
        )
        .with_chain(JobPayload::PdfGeneration(PdfGenerationPayload {
            client_id: payload.client_id.clone(),
            artifact_type: ArtifactType::Proposal,
            artifact_id: proposal.id,
        })))
    }
}
