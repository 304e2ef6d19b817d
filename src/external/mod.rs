pub mod ai_client;
pub mod document_renderer;
pub mod notification_sender;

#[cfg(test)]
pub mod mock;

pub use ai_client::{AiAnalysisClient, HttpAiClient};
pub use document_renderer::{DocumentRenderer, HttpDocumentRenderer};
pub use notification_sender::{NotificationMessage, NotificationSender, HttpNotificationSender};
