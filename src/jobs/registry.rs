use log::info;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::jobs::processor_trait::StageProcessor;
use crate::jobs::processors::{
    AiProcessingProcessor, NotificationProcessor, PdfGenerationProcessor,
    ProposalGenerationProcessor, SopGenerationProcessor,
};
use crate::models::StageQueue;

/// Maps each stage queue to its processor. Built explicitly at startup;
/// dispatching to a queue with no registered processor is a hard error.
pub struct ProcessorRegistry {
    processors: HashMap<StageQueue, Arc<dyn StageProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self { processors: HashMap::new() }
    }

    /// Registry with the five standard pipeline processors.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AiProcessingProcessor));
        registry.register(Arc::new(SopGenerationProcessor));
        registry.register(Arc::new(ProposalGenerationProcessor));
        registry.register(Arc::new(PdfGenerationProcessor));
        registry.register(Arc::new(NotificationProcessor));
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn StageProcessor>) {
        info!(
            "Registered processor '{}' for queue {}",
            processor.name(),
            processor.queue()
        );
        self.processors.insert(processor.queue(), processor);
    }

    pub fn get(&self, queue: StageQueue) -> AppResult<Arc<dyn StageProcessor>> {
        self.processors
            .get(&queue)
            .cloned()
            .ok_or_else(|| AppError::JobError(format!("No processor registered for queue {queue}")))
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_queue() {
        let registry = ProcessorRegistry::standard();
        for queue in StageQueue::all() {
            let processor = registry.get(queue).unwrap();
            assert_eq!(processor.queue(), queue);
        }
    }

    #[test]
    fn empty_registry_rejects_dispatch() {
        let registry = ProcessorRegistry::new();
        assert!(registry.get(StageQueue::AiProcessing).is_err());
    }
}
