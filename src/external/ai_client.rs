use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{FormResponse, IdentifiedProcess, IdentifiedProcessDraft, SopDraft};
use crate::utils::read_env;

/// Remote AI analysis service: identifies automatable processes in a form
/// submission and drafts SOP documents for them.
#[async_trait]
pub trait AiAnalysisClient: Send + Sync {
    /// Analyze a diagnostic form submission and return the processes it
    /// identifies. Ordering is by the service's own confidence ranking.
    async fn analyze_form_response(
        &self,
        response: &FormResponse,
    ) -> AppResult<Vec<IdentifiedProcessDraft>>;

    /// Draft a standard operating procedure for one identified process.
    async fn draft_sop(&self, process: &IdentifiedProcess) -> AppResult<SopDraft>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    client_id: &'a str,
    submission_id: &'a str,
    answers: &'a [crate::models::FormAnswer],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    processes: Vec<IdentifiedProcessDraft>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DraftSopRequest<'a> {
    process_name: &'a str,
    process_description: &'a str,
}

/// HTTP implementation against the analysis service API.
pub struct HttpAiClient {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl HttpAiClient {
    pub fn from_env() -> AppResult<Self> {
        let base_url = read_env("SOPFLOW_AI_BASE_URL", "http://localhost:8090");
        let api_key = std::env::var("SOPFLOW_AI_API_KEY")
            .map_err(|_| AppError::ConfigError("SOPFLOW_AI_API_KEY is not set".to_string()))?;
        Ok(Self { http_client: Client::new(), base_url, api_key })
    }

    async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> AppResult<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("AI service call: POST {url}");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalServiceError(format!(
                "AI service returned {status}: {text}"
            )));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl AiAnalysisClient for HttpAiClient {
    async fn analyze_form_response(
        &self,
        response: &FormResponse,
    ) -> AppResult<Vec<IdentifiedProcessDraft>> {
        let request = AnalyzeRequest {
            client_id: &response.client_id,
            submission_id: &response.submission_id,
            answers: &response.answers,
        };
        let parsed: AnalyzeResponse = self.post_json("/v1/analyze", &request).await?;
        Ok(parsed.processes)
    }

    async fn draft_sop(&self, process: &IdentifiedProcess) -> AppResult<SopDraft> {
        let request = DraftSopRequest {
            process_name: &process.name,
            process_description: &process.description,
        };
        self.post_json("/v1/sops/draft", &request).await
    }
}
