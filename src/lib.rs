pub mod config;
pub mod db_utils;
pub mod error;
pub mod external;
pub mod jobs;
pub mod models;
pub mod utils;
pub mod webhooks;
pub mod workflow;

use log::info;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::db_utils::{
    FormResponseRepository, JobRepository, StageOutputRepository, WebhookEventRepository,
    WorkflowRepository,
};
use crate::error::AppResult;
use crate::external::{AiAnalysisClient, DocumentRenderer, NotificationSender};
use crate::jobs::{JobDispatcher, JobScheduler, ProcessorContext, ProcessorRegistry, QueueManager};
use crate::webhooks::WebhookAdapter;
use crate::workflow::WorkflowStateMachine;

/// The assembled engine: one queue manager, one scheduler, one webhook
/// adapter, all sharing a pool. Built explicitly at startup and passed to
/// whatever surface (worker binary, HTTP layer) hosts it.
pub struct Engine {
    pub config: Arc<EngineConfig>,
    pub queue_manager: Arc<QueueManager>,
    pub scheduler: JobScheduler,
    pub webhook_adapter: Arc<WebhookAdapter>,
    pub workflow: WorkflowStateMachine,
}

/// External service implementations the engine should run against.
pub struct EngineServices {
    pub ai_client: Arc<dyn AiAnalysisClient>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub notifier: Arc<dyn NotificationSender>,
}

/// Open the database, wire every component, and return the engine ready to
/// start. Nothing is spawned until `Engine::start`.
pub async fn init_engine(
    database_url: &str,
    config: EngineConfig,
    services: EngineServices,
) -> AppResult<Engine> {
    let config = Arc::new(config);
    let pool = Arc::new(db_utils::connection::connect(database_url).await?);

    let jobs = JobRepository::new(pool.clone());
    let workflow = WorkflowStateMachine::new(WorkflowRepository::new(pool.clone()));
    let stage_outputs = StageOutputRepository::new(pool.clone());
    let form_responses = FormResponseRepository::new(pool.clone());
    let events = WebhookEventRepository::new(pool.clone());

    let queue_manager = Arc::new(QueueManager::new(jobs.clone(), config.clone()));

    let context = ProcessorContext {
        config: config.clone(),
        jobs,
        workflow: workflow.clone(),
        stage_outputs: stage_outputs.clone(),
        form_responses: form_responses.clone(),
        ai_client: services.ai_client,
        renderer: services.renderer,
        notifier: services.notifier,
    };

    let dispatcher = Arc::new(JobDispatcher::new(
        queue_manager.clone(),
        Arc::new(ProcessorRegistry::standard()),
        context,
    ));
    let scheduler = JobScheduler::new(queue_manager.clone(), dispatcher, config.clone());

    let webhook_adapter = Arc::new(WebhookAdapter::new(
        events,
        form_responses,
        stage_outputs,
        workflow.clone(),
        queue_manager.clone(),
        config.clone(),
    ));

    info!("Engine initialized");
    Ok(Engine { config, queue_manager, scheduler, webhook_adapter, workflow })
}

impl Engine {
    /// Recover persisted work and start the scheduler loops.
    pub async fn start(&self) -> AppResult<()> {
        self.scheduler.recover().await?;
        self.scheduler.start();
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
