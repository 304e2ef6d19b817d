pub mod connection;
pub mod form_response_repository;
pub mod job_repository;
pub mod stage_output_repository;
pub mod webhook_event_repository;
pub mod workflow_repository;

pub use form_response_repository::FormResponseRepository;
pub use job_repository::JobRepository;
pub use stage_output_repository::StageOutputRepository;
pub use webhook_event_repository::WebhookEventRepository;
pub use workflow_repository::WorkflowRepository;
