mod base;
mod cleanup;
mod helpers;
mod queries;
mod status;
mod worker;

pub use base::JobRepository;
pub use queries::QueueDepth;
