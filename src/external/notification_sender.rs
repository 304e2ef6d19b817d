use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::NotificationType;
use crate::utils::read_env;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub notification_type: NotificationType,
    pub subject: String,
    pub body: String,
}

/// Outbound notification channel (email under the default deployment).
#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn send(&self, recipient: &str, message: &NotificationMessage) -> AppResult<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    category: String,
}

pub struct HttpNotificationSender {
    http_client: Client,
    base_url: String,
}

impl HttpNotificationSender {
    pub fn from_env() -> Self {
        let base_url = read_env("SOPFLOW_NOTIFIER_BASE_URL", "http://localhost:8092");
        Self { http_client: Client::new(), base_url }
    }
}

#[async_trait]
impl NotificationSender for HttpNotificationSender {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn send(&self, recipient: &str, message: &NotificationMessage) -> AppResult<()> {
        let url = format!("{}/v1/send", self.base_url);
        debug!("Notifier call: POST {url} -> {recipient}");

        let response = self
            .http_client
            .post(&url)
            .json(&SendRequest {
                to: recipient,
                subject: &message.subject,
                body: &message.body,
                category: message.notification_type.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalServiceError(format!(
                "Notifier returned {status}: {text}"
            )));
        }

        Ok(())
    }
}
