use serde::{Deserialize, Serialize};

use crate::models::{
    ArtifactType, JobPriority, JobStatus, NotificationType, StageQueue,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiProcessingPayload {
    pub client_id: String,
    pub form_response_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SopGenerationPayload {
    pub client_id: String,
    pub ai_job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalGenerationPayload {
    pub client_id: String,
    pub approved_sop_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfGenerationPayload {
    pub client_id: String,
    pub artifact_type: ArtifactType,
    pub artifact_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub client_id: String,
    pub notification_type: NotificationType,
}

/// Stage-specific job payloads, tagged so they survive the round trip through
/// the jobs table as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum JobPayload {
    AiProcessing(AiProcessingPayload),
    SopGeneration(SopGenerationPayload),
    ProposalGeneration(ProposalGenerationPayload),
    PdfGeneration(PdfGenerationPayload),
    Notification(NotificationPayload),
}

impl JobPayload {
    /// The queue this payload belongs on. Enqueueing a payload on any other
    /// queue is a validation error.
    pub fn queue(&self) -> StageQueue {
        match self {
            JobPayload::AiProcessing(_) => StageQueue::AiProcessing,
            JobPayload::SopGeneration(_) => StageQueue::SopGeneration,
            JobPayload::ProposalGeneration(_) => StageQueue::ProposalGeneration,
            JobPayload::PdfGeneration(_) => StageQueue::PdfGeneration,
            JobPayload::Notification(_) => StageQueue::Notifications,
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            JobPayload::AiProcessing(p) => &p.client_id,
            JobPayload::SopGeneration(p) => &p.client_id,
            JobPayload::ProposalGeneration(p) => &p.client_id,
            JobPayload::PdfGeneration(p) => &p.client_id,
            JobPayload::Notification(p) => &p.client_id,
        }
    }
}

/// One queued unit of work. The queue manager exclusively owns its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub queue: StageQueue,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Earliest eligible run time (ms epoch); None means immediately eligible.
    pub process_after: Option<i64>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub last_error: Option<String>,
    /// Job id of the predecessor stage that enqueued this one, if chained.
    pub chained_from: Option<String>,
}

impl Job {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_id(&self) -> &str {
        self.payload.client_id()
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

/// Options accepted by `QueueManager::enqueue`.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Option<JobPriority>,
    pub delay_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub chained_from: Option<String>,
}

/// A follow-up enqueue the dispatcher performs after a successful stage.
/// Chaining is explicit and recorded on the new job via `chained_from`, so a
/// crash between "stage N succeeded" and "stage N+1 enqueued" is observable.
#[derive(Debug, Clone)]
pub struct ChainedEnqueue {
    pub payload: JobPayload,
    pub priority: JobPriority,
}

/// Result of one processor execution.
#[derive(Debug, Clone)]
pub struct JobProcessResult {
    pub job_id: String,
    pub status: JobStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Successor work to enqueue, decided by the processor.
    pub chain: Option<ChainedEnqueue>,
}

impl JobProcessResult {
    pub fn success(job_id: String, output: serde_json::Value) -> Self {
        Self {
            job_id,
            status: JobStatus::Completed,
            output: Some(output),
            error: None,
            chain: None,
        }
    }

    pub fn with_chain(mut self, payload: JobPayload) -> Self {
        self.chain = Some(ChainedEnqueue { payload, priority: JobPriority::Normal });
        self
    }

    pub fn with_chain_priority(mut self, payload: JobPayload, priority: JobPriority) -> Self {
        self.chain = Some(ChainedEnqueue { payload, priority });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_maps_to_its_queue() {
        let payload = JobPayload::AiProcessing(AiProcessingPayload {
            client_id: "c1".to_string(),
            form_response_id: "r1".to_string(),
        });
        assert_eq!(payload.queue(), StageQueue::AiProcessing);
        assert_eq!(payload.client_id(), "c1");
    }

    #[test]
    fn payload_round_trips_through_json() {
        let payload = JobPayload::PdfGeneration(PdfGenerationPayload {
            client_id: "c9".to_string(),
            artifact_type: ArtifactType::Proposal,
            artifact_id: "p-1".to_string(),
        });
        let json = serde_json::to_string(&payload).unwrap();
        let back: JobPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.queue(), StageQueue::PdfGeneration);
        assert_eq!(back.client_id(), "c9");
    }
}
