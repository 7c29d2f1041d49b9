use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{CoreError, DocumentProcessingError, FailureKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentKind {
    JobAd,
    Cv,
}

#[derive(Debug, Clone)]
enum FileSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

/// A user-selected document. Paths are read lazily by the worker so an
/// unreadable file fails on its own instead of aborting the whole selection.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    source: FileSource,
}

impl UploadedFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            file_name,
            source: FileSource::Path(path),
        }
    }

    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            source: FileSource::Bytes(bytes.into()),
        }
    }

    pub async fn read(&self) -> Result<Arc<[u8]>, CoreError> {
        match &self.source {
            FileSource::Bytes(bytes) => Ok(Arc::clone(bytes)),
            FileSource::Path(path) => tokio::fs::read(path)
                .await
                .map(Arc::from)
                .map_err(|err| CoreError::UnreadableDocument(format!("{}: {err}", path.display()))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobRequirements {
    pub source_file: String,
    pub title: String,
    pub company: String,
    pub required_skills: Vec<String>,
    pub desired_skills: Vec<String>,
    pub experience_level: String,
    pub education: String,
    pub responsibilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProfile {
    pub source_file: String,
    pub upload_index: usize,
    pub name: String,
    pub skills: Vec<String>,
    pub experience: Vec<String>,
    pub education: Vec<String>,
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRef {
    pub file_name: String,
    pub upload_index: usize,
    pub name: String,
}

impl From<&CandidateProfile> for CandidateRef {
    fn from(profile: &CandidateProfile) -> Self {
        Self {
            file_name: profile.source_file.clone(),
            upload_index: profile.upload_index,
            name: profile.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub candidate: CandidateRef,
    pub score: u8,
    pub justification: String,
}

/// Match results ordered by score, highest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RankedList {
    pub entries: Vec<MatchResult>,
}

impl RankedList {
    pub fn most_suitable(&self) -> Option<&MatchResult> {
        self.entries.first()
    }

    pub fn others(&self) -> &[MatchResult] {
        self.entries.get(1..).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub file_name: String,
    pub upload_index: Option<usize>,
    pub kind: FailureKind,
    pub message: String,
}

impl FileFailure {
    pub fn from_error(err: &DocumentProcessingError, upload_index: Option<usize>) -> Self {
        Self {
            file_name: err.file_name.clone(),
            upload_index,
            kind: err.kind(),
            message: err.cause.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: u64,
    pub status: RunState,
    pub job: Option<JobRequirements>,
    pub ranked: RankedList,
    #[serde(default)]
    pub failures: Vec<FileFailure>,
    pub total_files: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScorerBackend {
    #[default]
    Llm,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    pub api_endpoint: String,
    pub vision_model: String,
    pub text_model: String,
    pub scorer: ScorerBackend,
    pub max_concurrent_requests: usize,
    pub max_retries: usize,
    pub retry_delay_seconds: f64,
    pub request_timeout_seconds: u64,
    pub max_document_chars: usize,
    pub pdf_text_min_chars: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            api_endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            vision_model: "gemini-1.5-flash".to_string(),
            text_model: "gemini-1.5-flash".to_string(),
            scorer: ScorerBackend::Llm,
            max_concurrent_requests: 4,
            max_retries: 3,
            retry_delay_seconds: 1.0,
            request_timeout_seconds: 120,
            max_document_chars: 6000,
            pdf_text_min_chars: 50,
        }
    }
}

impl RuntimeSettings {
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            api_endpoint: non_blank_or(self.api_endpoint, defaults.api_endpoint),
            vision_model: non_blank_or(self.vision_model, defaults.vision_model),
            text_model: non_blank_or(self.text_model, defaults.text_model),
            scorer: self.scorer,
            max_concurrent_requests: self.max_concurrent_requests.max(1),
            max_retries: self.max_retries.max(1),
            retry_delay_seconds: self.retry_delay_seconds.max(0.1),
            request_timeout_seconds: self.request_timeout_seconds.max(5),
            max_document_chars: self.max_document_chars.max(500),
            pdf_text_min_chars: self.pdf_text_min_chars,
        }
    }
}

fn non_blank_or(value: String, fallback: String) -> String {
    if value.trim().is_empty() {
        fallback
    } else {
        value.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_settings_enforce_minimums() {
        let settings = RuntimeSettings {
            api_endpoint: "  ".to_string(),
            max_concurrent_requests: 0,
            max_retries: 0,
            retry_delay_seconds: 0.0,
            ..RuntimeSettings::default()
        }
        .sanitized();

        assert_eq!(settings.api_endpoint, RuntimeSettings::default().api_endpoint);
        assert_eq!(settings.max_concurrent_requests, 1);
        assert_eq!(settings.max_retries, 1);
        assert!(settings.retry_delay_seconds >= 0.1);
    }

    #[test]
    fn partial_settings_json_falls_back_to_defaults() {
        let parsed: RuntimeSettings =
            serde_json::from_str(r#"{"textModel": "gemini-2.0-flash", "scorer": "keyword"}"#)
                .unwrap();

        assert_eq!(parsed.text_model, "gemini-2.0-flash");
        assert_eq!(parsed.scorer, ScorerBackend::Keyword);
        assert_eq!(parsed.max_document_chars, 6000);
    }

    #[tokio::test]
    async fn unreadable_path_reports_document_error() {
        let file = UploadedFile::from_path("/definitely/not/here/cv.pdf");
        assert_eq!(file.file_name, "cv.pdf");

        let err = file.read().await.unwrap_err();
        assert!(matches!(err, CoreError::UnreadableDocument(_)));
    }
}
