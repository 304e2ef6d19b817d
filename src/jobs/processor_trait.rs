use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::db_utils::{FormResponseRepository, JobRepository, StageOutputRepository};
use crate::error::AppResult;
use crate::external::{AiAnalysisClient, DocumentRenderer, NotificationSender};
use crate::jobs::types::{Job, JobProcessResult};
use crate::models::StageQueue;
use crate::workflow::WorkflowStateMachine;

/// Everything a stage processor may touch, passed explicitly so processors
/// are plain values that can be constructed against fakes in tests.
#[derive(Clone)]
pub struct ProcessorContext {
    pub config: Arc<EngineConfig>,
    pub jobs: JobRepository,
    pub workflow: WorkflowStateMachine,
    pub stage_outputs: StageOutputRepository,
    pub form_responses: FormResponseRepository,
    pub ai_client: Arc<dyn AiAnalysisClient>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub notifier: Arc<dyn NotificationSender>,
}

/// One pipeline stage's execution logic.
///
/// A processor must be idempotent-friendly: it can be re-run after a crash
/// mid-attempt, so side effects should either be safe to repeat or guarded
/// by the state machine's compare-and-swap.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// The single queue this processor serves.
    fn queue(&self) -> StageQueue;

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> AppResult<JobProcessResult>;
}
