use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("Could not read document: {0}")]
    UnreadableDocument(String),
    #[error("No readable text could be extracted")]
    EmptyDocument,
    #[error("Could not recover a structured record from the model response")]
    ExtractionFailure { raw_text: String },
    #[error("Gemini API request failed with status {status}: {body}")]
    ServiceCall { status: u16, body: String },
    #[error("Gemini API request failed: {0}")]
    ServiceTransport(String),
    #[error("Gemini API refused the request: {0}")]
    ServiceRefused(String),
    #[error("Gemini API key is not configured. Set GEMINI_API_KEY or run `key set` first.")]
    MissingApiKey,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::ServiceCall { status, .. } => *status == 429 || *status >= 500,
            CoreError::ServiceTransport(_) => true,
            _ => false,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            CoreError::ExtractionFailure { .. } => FailureKind::Extraction,
            CoreError::ServiceCall { .. }
            | CoreError::ServiceTransport(_)
            | CoreError::ServiceRefused(_)
            | CoreError::MissingApiKey => FailureKind::Service,
            _ => FailureKind::Document,
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => CoreError::ServiceCall {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => CoreError::ServiceTransport(err.to_string()),
        }
    }
}

/// Per-file failure category surfaced to the presentation layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Document,
    Extraction,
    Service,
    /// The worker itself failed; not tied to one document.
    Internal,
}

#[derive(Debug, Error)]
#[error("{file_name}: {cause}")]
pub struct DocumentProcessingError {
    pub file_name: String,
    #[source]
    pub cause: CoreError,
}

impl DocumentProcessingError {
    pub fn new(file_name: impl Into<String>, cause: CoreError) -> Self {
        Self {
            file_name: file_name.into(),
            cause,
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.cause.kind()
    }

    /// Raw model text attached to an extraction failure, kept for diagnostics.
    pub fn raw_text(&self) -> Option<&str> {
        match &self.cause {
            CoreError::ExtractionFailure { raw_text } => Some(raw_text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_match_rate_limits_and_server_errors() {
        let rate_limited = CoreError::ServiceCall {
            status: 429,
            body: String::new(),
        };
        let unavailable = CoreError::ServiceCall {
            status: 503,
            body: String::new(),
        };
        let unauthorized = CoreError::ServiceCall {
            status: 401,
            body: String::new(),
        };

        assert!(rate_limited.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!unauthorized.is_retryable());
        assert!(CoreError::ServiceTransport("timed out".into()).is_retryable());
        assert!(!CoreError::EmptyDocument.is_retryable());
    }

    #[test]
    fn document_processing_error_keeps_file_name_and_kind() {
        let err = DocumentProcessingError::new(
            "cv.pdf",
            CoreError::ExtractionFailure {
                raw_text: "garbage".to_string(),
            },
        );

        assert_eq!(err.kind(), FailureKind::Extraction);
        assert_eq!(err.raw_text(), Some("garbage"));
        assert!(err.to_string().starts_with("cv.pdf: "));
    }
}
