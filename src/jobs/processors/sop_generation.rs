use async_trait::async_trait;
use log::info;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::jobs::processor_trait::{ProcessorContext, StageProcessor};
use crate::jobs::processors::advance_once;
use crate::jobs::types::{Job, JobPayload, JobProcessResult};
use crate::models::{ClientStatus, StageQueue};

/// Drafts one SOP document per identified process. The process-count gate is
/// re-checked here as a hard rule: below the minimum, the job fails without
/// retries, since retrying cannot produce more processes.
///
/// No stage is chained afterward; a human approves processes before the
/// proposal is generated.
pub struct SopGenerationProcessor;

#[async_trait]
impl StageProcessor for SopGenerationProcessor {
    fn name(&self) -> &'static str {
        "sop-generation"
    }

    fn queue(&self) -> StageQueue {
        StageQueue::SopGeneration
    }

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> AppResult<JobProcessResult> {
        let JobPayload::SopGeneration(payload) = &job.payload else {
            return Err(AppError::ValidationError(format!(
                "Job {} carries a non-SOP payload",
                job.id
            )));
        };

        let processes = ctx
            .stage_outputs
            .get_identified_processes(&payload.client_id)
            .await?;
        if processes.len() < ctx.config.min_processes_to_advance {
            return Err(AppError::BusinessRuleError(format!(
                "Client {} has {} identified process(es); {} are required for SOP generation",
                payload.client_id,
                processes.len(),
                ctx.config.min_processes_to_advance
            )));
        }

        // Skip processes already covered by an earlier attempt.
        let covered: HashSet<String> = ctx
            .stage_outputs
            .get_sops(&payload.client_id)
            .await?
            .into_iter()
            .map(|sop| sop.process_id)
            .collect();

        let timeout = Duration::from_secs(ctx.config.ai_call_timeout_secs);
        let mut generated = 0usize;
        for process in processes.iter().filter(|p| !covered.contains(&p.id)) {
            let draft = tokio::time::timeout(timeout, ctx.ai_client.draft_sop(process))
                .await
                .map_err(|_| {
                    AppError::TimeoutError(format!(
                        "SOP drafting exceeded {}s for process {}",
                        ctx.config.ai_call_timeout_secs, process.id
                    ))
                })??;

            ctx.stage_outputs
                .insert_sop(&payload.client_id, &process.id, &draft.title, &draft.content)
                .await?;
            generated += 1;
        }

        advance_once(ctx, &payload.client_id, ClientStatus::ProcessingAi, "job.sop_generation")
            .await?;

        info!(
            "Client {}: {generated} SOP(s) drafted ({} already existed)",
            payload.client_id,
            covered.len()
        );

        Ok(JobProcessResult::success(
            job.id.clone(),
            json!({ "sopsGenerated": generated, "sopsReused": covered.len() }),
        ))
    }
}
