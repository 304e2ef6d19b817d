use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum AppError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serde JSON error: {0}")]
    SerdeError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("HTTP client error: {0}")]
    HttpError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job error: {0}")]
    JobError(String),

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Business rule violation: {0}")]
    BusinessRuleError(String),

    #[error("Stale workflow state: {0}")]
    StaleStateError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Retry classification: the Queue Manager is the single place that acts
    /// on this. Validation, business-rule, stale-state and not-found failures
    /// are deterministic and must never be retried blindly; everything else
    /// is assumed transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::ConfigError(_)
                | AppError::ValidationError(_)
                | AppError::BusinessRuleError(_)
                | AppError::StaleStateError(_)
                | AppError::NotFoundError(_)
                | AppError::UnknownQueue(_)
                | AppError::SerdeError(_)
                | AppError::SerializationError(_)
        )
    }

    /// Stable machine-readable code, used in persisted `last_error` fields
    /// and escalation logs.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::IoError(_) => "IO_ERROR",
            AppError::SerdeError(_) => "SERDE_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::HttpError(_) => "HTTP_ERROR",
            AppError::ConfigError(_) => "CONFIG_ERROR",
            AppError::JobError(_) => "JOB_ERROR",
            AppError::UnknownQueue(_) => "UNKNOWN_QUEUE",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::BusinessRuleError(_) => "BUSINESS_RULE_ERROR",
            AppError::StaleStateError(_) => "STALE_STATE_ERROR",
            AppError::NotFoundError(_) => "NOT_FOUND_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::TimeoutError(_) => "TIMEOUT_ERROR",
            AppError::SerializationError(_) => "SERIALIZATION_ERROR",
            AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerdeError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::TimeoutError(err.to_string())
        } else {
            AppError::HttpError(err.to_string())
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<String> for AppError {
    fn from(error: String) -> Self {
        AppError::InternalError(error)
    }
}

impl From<&str> for AppError {
    fn from(error: &str) -> Self {
        AppError::InternalError(error.to_string())
    }
}

// A serializable version of AppError for event payloads and escalation records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializableError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<AppError> for SerializableError {
    fn from(error: AppError) -> Self {
        SerializableError {
            code: error.code().to_string(),
            retryable: error.is_retryable(),
            message: error.to_string(),
        }
    }
}

// Define a Result type alias using our AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_rule_errors_are_fatal() {
        let err = AppError::BusinessRuleError("only 3 processes identified".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn external_service_errors_are_retryable() {
        assert!(AppError::ExternalServiceError("503".to_string()).is_retryable());
        assert!(AppError::TimeoutError("render timeout".to_string()).is_retryable());
    }

    #[test]
    fn stale_state_is_not_retried_by_queue() {
        // The caller re-reads and re-requests; the queue must not loop on it.
        assert!(!AppError::StaleStateError("expected form_sent".to_string()).is_retryable());
    }
}
