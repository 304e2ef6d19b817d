use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::utils::read_env;

/// Service that renders a document body into a stored PDF and returns a
/// storage reference for it.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render_pdf(&self, title: &str, body: &str) -> AppResult<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest<'a> {
    title: &'a str,
    body: &'a str,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenderResponse {
    storage_ref: String,
}

pub struct HttpDocumentRenderer {
    http_client: Client,
    base_url: String,
}

impl HttpDocumentRenderer {
    pub fn from_env() -> Self {
        let base_url = read_env("SOPFLOW_RENDERER_BASE_URL", "http://localhost:8091");
        Self { http_client: Client::new(), base_url }
    }
}

#[async_trait]
impl DocumentRenderer for HttpDocumentRenderer {
    async fn render_pdf(&self, title: &str, body: &str) -> AppResult<String> {
        let url = format!("{}/v1/render", self.base_url);
        debug!("Renderer call: POST {url} ({title})");

        let response = self
            .http_client
            .post(&url)
            .json(&RenderRequest { title, body, format: "pdf" })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalServiceError(format!(
                "Renderer returned {status}: {text}"
            )));
        }

        let parsed: RenderResponse = response.json().await?;
        Ok(parsed.storage_ref)
    }
}
