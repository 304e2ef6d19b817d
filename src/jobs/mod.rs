pub mod dispatcher;
pub mod processor_trait;
pub mod processors;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod types;

pub use dispatcher::JobDispatcher;
pub use processor_trait::{ProcessorContext, StageProcessor};
pub use queue::QueueManager;
pub use registry::ProcessorRegistry;
pub use scheduler::JobScheduler;
