use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Job status enum that matches the SQL schema CHECK constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Priority levels for jobs. Ordering matters: urgent > high > normal > low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl JobPriority {
    pub const COUNT: usize = 4;

    pub fn from_index(index: i64) -> JobPriority {
        match index {
            0 => JobPriority::Low,
            2 => JobPriority::High,
            3 => JobPriority::Urgent,
            _ => JobPriority::Normal,
        }
    }
}

/// The five pipeline stage queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageQueue {
    AiProcessing,
    SopGeneration,
    ProposalGeneration,
    PdfGeneration,
    Notifications,
}

impl fmt::Display for StageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.queue_name())
    }
}

impl FromStr for StageQueue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai-processing" => Ok(StageQueue::AiProcessing),
            "sop-generation" => Ok(StageQueue::SopGeneration),
            "proposal-generation" => Ok(StageQueue::ProposalGeneration),
            "pdf-generation" => Ok(StageQueue::PdfGeneration),
            "notifications" => Ok(StageQueue::Notifications),
            _ => Err(format!("Unknown queue: {s}")),
        }
    }
}

impl StageQueue {
    pub fn all() -> [StageQueue; 5] {
        [
            StageQueue::AiProcessing,
            StageQueue::SopGeneration,
            StageQueue::ProposalGeneration,
            StageQueue::PdfGeneration,
            StageQueue::Notifications,
        ]
    }

    pub fn queue_name(&self) -> &'static str {
        match self {
            StageQueue::AiProcessing => "ai-processing",
            StageQueue::SopGeneration => "sop-generation",
            StageQueue::ProposalGeneration => "proposal-generation",
            StageQueue::PdfGeneration => "pdf-generation",
            StageQueue::Notifications => "notifications",
        }
    }

    pub fn env_key(&self) -> &'static str {
        match self {
            StageQueue::AiProcessing => "AI_PROCESSING",
            StageQueue::SopGeneration => "SOP_GENERATION",
            StageQueue::ProposalGeneration => "PROPOSAL_GENERATION",
            StageQueue::PdfGeneration => "PDF_GENERATION",
            StageQueue::Notifications => "NOTIFICATIONS",
        }
    }

    /// Unconditional successor in the pipeline. Conditional chaining
    /// (ai-processing → sop-generation on the process-count gate) is decided
    /// by the processor, not here.
    pub fn successor(&self) -> Option<StageQueue> {
        match self {
            StageQueue::AiProcessing => None,
            StageQueue::SopGeneration => None, // human approval gates the proposal
            StageQueue::ProposalGeneration => Some(StageQueue::PdfGeneration),
            StageQueue::PdfGeneration => Some(StageQueue::Notifications),
            StageQueue::Notifications => None,
        }
    }
}

/// Client workflow status: the mostly-linear pipeline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Created,
    FormSent,
    ResponsesReceived,
    ProcessingAi,
    SopsGenerated,
    ProposalReady,
    ProposalSent,
    Closed,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientStatus::Created => "created",
            ClientStatus::FormSent => "form_sent",
            ClientStatus::ResponsesReceived => "responses_received",
            ClientStatus::ProcessingAi => "processing_ai",
            ClientStatus::SopsGenerated => "sops_generated",
            ClientStatus::ProposalReady => "proposal_ready",
            ClientStatus::ProposalSent => "proposal_sent",
            ClientStatus::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ClientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ClientStatus::Created),
            "form_sent" => Ok(ClientStatus::FormSent),
            "responses_received" => Ok(ClientStatus::ResponsesReceived),
            "processing_ai" => Ok(ClientStatus::ProcessingAi),
            "sops_generated" => Ok(ClientStatus::SopsGenerated),
            "proposal_ready" => Ok(ClientStatus::ProposalReady),
            "proposal_sent" => Ok(ClientStatus::ProposalSent),
            "closed" => Ok(ClientStatus::Closed),
            _ => Err(format!("Invalid client status: {s}")),
        }
    }
}

impl ClientStatus {
    /// The next status in the canonical sequence, if any.
    pub fn canonical_next(&self) -> Option<ClientStatus> {
        match self {
            ClientStatus::Created => Some(ClientStatus::FormSent),
            ClientStatus::FormSent => Some(ClientStatus::ResponsesReceived),
            ClientStatus::ResponsesReceived => Some(ClientStatus::ProcessingAi),
            ClientStatus::ProcessingAi => Some(ClientStatus::SopsGenerated),
            ClientStatus::SopsGenerated => Some(ClientStatus::ProposalReady),
            ClientStatus::ProposalReady => Some(ClientStatus::ProposalSent),
            ClientStatus::ProposalSent => Some(ClientStatus::Closed),
            ClientStatus::Closed => None,
        }
    }

    /// Position in the canonical sequence, for monotonicity checks.
    pub fn ordinal(&self) -> u8 {
        match self {
            ClientStatus::Created => 0,
            ClientStatus::FormSent => 1,
            ClientStatus::ResponsesReceived => 2,
            ClientStatus::ProcessingAi => 3,
            ClientStatus::SopsGenerated => 4,
            ClientStatus::ProposalReady => 5,
            ClientStatus::ProposalSent => 6,
            ClientStatus::Closed => 7,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientStatus::Closed)
    }
}

/// Who requested a workflow transition or administrative action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    System,
    User(String),
    Admin(String),
}

impl Actor {
    pub fn is_administrative(&self) -> bool {
        matches!(self, Actor::Admin(_))
    }

    pub fn as_db_string(&self) -> String {
        match self {
            Actor::System => "system".to_string(),
            Actor::User(id) => format!("user:{id}"),
            Actor::Admin(id) => format!("admin:{id}"),
        }
    }

    pub fn from_db_string(s: &str) -> Actor {
        if s == "system" {
            Actor::System
        } else if let Some(id) = s.strip_prefix("user:") {
            Actor::User(id.to_string())
        } else if let Some(id) = s.strip_prefix("admin:") {
            Actor::Admin(id.to_string())
        } else {
            Actor::User(s.to_string())
        }
    }
}

// Client record as persisted in the clients table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    /// External diagnostic form assigned to this client, used to correlate
    /// inbound form webhooks.
    pub form_id: Option<String>,
    pub current_status: ClientStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An immutable record of one workflow-status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTransition {
    pub id: String,
    pub client_id: String,
    pub from_status: ClientStatus,
    pub to_status: ClientStatus,
    pub trigger_event: String,
    pub actor: Actor,
    pub context: Option<serde_json::Value>,
    pub created_at: i64,
}

// One answered question within a form submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormAnswer {
    pub question_id: String,
    pub question: String,
    pub answer: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormResponse {
    pub id: String,
    pub client_id: String,
    pub form_id: String,
    pub submission_id: String,
    pub answers: Vec<FormAnswer>,
    pub submitted_at: Option<i64>,
    pub completion_time_minutes: Option<f64>,
    pub created_at: i64,
}

/// Output of the AI analysis stage; immutable except for the approval flag,
/// which a human reviewer sets outside this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiedProcess {
    pub id: String,
    pub client_id: String,
    pub form_response_id: String,
    pub name: String,
    pub description: String,
    pub confidence: f64,
    pub approved: bool,
    pub created_at: i64,
}

/// Draft process as returned by the AI service, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiedProcessDraft {
    pub name: String,
    pub description: String,
    pub confidence: f64,
}

/// Draft SOP text as returned by the drafting service, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SopDraft {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSop {
    pub id: String,
    pub client_id: String,
    pub process_id: String,
    pub title: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommercialProposal {
    pub id: String,
    pub client_id: String,
    pub title: String,
    pub body: String,
    pub sop_ids: Vec<String>,
    pub created_at: i64,
}

/// Artifact kinds the renderer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Sop,
    Proposal,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactType::Sop => write!(f, "sop"),
            ArtifactType::Proposal => write!(f, "proposal"),
        }
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sop" => Ok(ArtifactType::Sop),
            "proposal" => Ok(ArtifactType::Proposal),
            _ => Err(format!("Invalid artifact type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedDocument {
    pub id: String,
    pub client_id: String,
    pub artifact_type: ArtifactType,
    pub artifact_id: String,
    pub storage_ref: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ProposalReady,
    ManualReviewRequired,
    PipelineFailed,
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationType::ProposalReady => "proposal_ready",
            NotificationType::ManualReviewRequired => "manual_review_required",
            NotificationType::PipelineFailed => "pipeline_failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposal_ready" => Ok(NotificationType::ProposalReady),
            "manual_review_required" => Ok(NotificationType::ManualReviewRequired),
            "pipeline_failed" => Ok(NotificationType::PipelineFailed),
            _ => Err(format!("Invalid notification type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub client_id: String,
    pub notification_type: NotificationType,
    pub channel: String,
    pub status: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_status_round_trips_through_strings() {
        for status in [
            ClientStatus::Created,
            ClientStatus::FormSent,
            ClientStatus::ResponsesReceived,
            ClientStatus::ProcessingAi,
            ClientStatus::SopsGenerated,
            ClientStatus::ProposalReady,
            ClientStatus::ProposalSent,
            ClientStatus::Closed,
        ] {
            let parsed: ClientStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn canonical_sequence_is_linear_and_ends_at_closed() {
        let mut current = ClientStatus::Created;
        let mut hops = 0;
        while let Some(next) = current.canonical_next() {
            assert!(next.ordinal() == current.ordinal() + 1);
            current = next;
            hops += 1;
        }
        assert_eq!(current, ClientStatus::Closed);
        assert_eq!(hops, 7);
    }

    #[test]
    fn queue_names_parse_back() {
        for queue in StageQueue::all() {
            let parsed: StageQueue = queue.queue_name().parse().unwrap();
            assert_eq!(parsed, queue);
        }
        assert!("mystery-queue".parse::<StageQueue>().is_err());
    }

    #[test]
    fn unconditional_successors_cover_the_render_tail() {
        assert_eq!(
            StageQueue::ProposalGeneration.successor(),
            Some(StageQueue::PdfGeneration)
        );
        assert_eq!(
            StageQueue::PdfGeneration.successor(),
            Some(StageQueue::Notifications)
        );
        // The front half chains conditionally (process-count gate, human
        // approval), so it exposes no unconditional successor.
        assert_eq!(StageQueue::AiProcessing.successor(), None);
        assert_eq!(StageQueue::SopGeneration.successor(), None);
    }

    #[test]
    fn priority_ordering_is_descending_urgency() {
        assert!(JobPriority::Urgent > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
    }

    #[test]
    fn actor_db_round_trip() {
        for actor in [
            Actor::System,
            Actor::User("u-1".to_string()),
            Actor::Admin("ops".to_string()),
        ] {
            assert_eq!(Actor::from_db_string(&actor.as_db_string()), actor);
        }
    }
}
