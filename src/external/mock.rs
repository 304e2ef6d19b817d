//! In-process fakes for the external services, used by the job and workflow
//! tests. Failure counts let tests exercise the retry path deterministically.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{AppError, AppResult};
use crate::models::{FormResponse, IdentifiedProcess, IdentifiedProcessDraft, SopDraft};

use super::ai_client::AiAnalysisClient;
use super::document_renderer::DocumentRenderer;
use super::notification_sender::{NotificationMessage, NotificationSender};

pub struct MockAiClient {
    /// Number of processes each analysis returns.
    pub process_count: usize,
    /// How many leading calls fail with a retryable error before succeeding.
    pub failures_before_success: AtomicU32,
    pub calls: AtomicU32,
}

impl MockAiClient {
    pub fn returning(process_count: usize) -> Self {
        Self {
            process_count,
            failures_before_success: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing_first(process_count: usize, failures: u32) -> Self {
        Self {
            process_count,
            failures_before_success: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    fn maybe_fail(&self) -> AppResult<()> {
        let remaining = self.failures_before_success.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
            return Err(AppError::ExternalServiceError(
                "simulated upstream outage".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AiAnalysisClient for MockAiClient {
    async fn analyze_form_response(
        &self,
        _response: &FormResponse,
    ) -> AppResult<Vec<IdentifiedProcessDraft>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        Ok((0..self.process_count)
            .map(|i| IdentifiedProcessDraft {
                name: format!("Process {i}"),
                description: "Repetitive manual workflow".to_string(),
                confidence: 0.9 - (i as f64) * 0.05,
            })
            .collect())
    }

    async fn draft_sop(&self, process: &IdentifiedProcess) -> AppResult<SopDraft> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        Ok(SopDraft {
            title: format!("SOP: {}", process.name),
            content: format!("Steps for {}", process.name),
        })
    }
}

pub struct MockRenderer {
    pub failures_before_success: AtomicU32,
}

impl MockRenderer {
    pub fn ok() -> Self {
        Self { failures_before_success: AtomicU32::new(0) }
    }

    pub fn failing_first(failures: u32) -> Self {
        Self { failures_before_success: AtomicU32::new(failures) }
    }
}

#[async_trait]
impl DocumentRenderer for MockRenderer {
    async fn render_pdf(&self, title: &str, _body: &str) -> AppResult<String> {
        if self.failures_before_success.load(Ordering::SeqCst) > 0 {
            self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
            return Err(AppError::ExternalServiceError(
                "simulated renderer outage".to_string(),
            ));
        }
        Ok(format!("s3://rendered/{}.pdf", title.replace(' ', "-").to_lowercase()))
    }
}

#[derive(Default)]
pub struct MockNotifier {
    pub sent: Mutex<Vec<(String, NotificationMessage)>>,
}

#[async_trait]
impl NotificationSender for MockNotifier {
    fn channel(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, recipient: &str, message: &NotificationMessage) -> AppResult<()> {
        match self.sent.lock() {
            Ok(mut sent) => {
                sent.push((recipient.to_string(), message.clone()));
                Ok(())
            }
            Err(e) => Err(AppError::InternalError(format!("mock notifier poisoned: {e}"))),
        }
    }
}
