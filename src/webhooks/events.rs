use serde::{Deserialize, Serialize};

use crate::models::{FormAnswer, IdentifiedProcessDraft};

/// Inbound form webhook, one variant per vendor event kind. Parsing rejects
/// unknown kinds up front, so handlers are exhaustive over what can arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum FormEvent {
    #[serde(rename = "form.started")]
    Started(FormEventBody),
    #[serde(rename = "form.updated")]
    Updated(FormEventBody),
    #[serde(rename = "form.completed")]
    Completed(FormEventBody),
}

impl FormEvent {
    pub fn body(&self) -> &FormEventBody {
        match self {
            FormEvent::Started(body) | FormEvent::Updated(body) | FormEvent::Completed(body) => {
                body
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FormEvent::Started(_) => "form.started",
            FormEvent::Updated(_) => "form.updated",
            FormEvent::Completed(_) => "form.completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormEventBody {
    pub event_id: String,
    pub form_id: String,
    pub submission_id: String,
    #[serde(default)]
    pub data: FormEventData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormEventData {
    #[serde(default)]
    pub responses: Vec<FormAnswer>,
    pub metadata: Option<FormEventMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormEventMetadata {
    pub submitted_at: Option<i64>,
    pub completion_time_minutes: Option<f64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Completion callback from the asynchronous AI analysis vendor, correlated
/// to the submitting job by its id. The vendor sends no event id of its own;
/// see `AiCompletionEvent::dedup_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiCompletionEvent {
    pub job_id: String,
    #[serde(flatten)]
    pub outcome: AiOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AiOutcome {
    Completed { results: AiResults },
    Failed { error: AiErrorBody },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResults {
    pub identified_processes: Vec<IdentifiedProcessDraft>,
    pub confidence_scores: Option<serde_json::Value>,
    pub quality_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiErrorBody {
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl AiCompletionEvent {
    /// Derived idempotency key: the vendor delivers at least once per
    /// (job, outcome) pair but carries no event id.
    pub fn dedup_key(&self) -> String {
        let status = match self.outcome {
            AiOutcome::Completed { .. } => "completed",
            AiOutcome::Failed { .. } => "failed",
        };
        format!("ai:{}:{status}", self.job_id)
    }

    pub fn kind(&self) -> &'static str {
        match self.outcome {
            AiOutcome::Completed { .. } => "ai.completed",
            AiOutcome::Failed { .. } => "ai.failed",
        }
    }
}
