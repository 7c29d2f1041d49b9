use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::errors::CoreError;
use super::models::RuntimeSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Vision,
    Text,
}

#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    InlineData { mime_type: String, data: Arc<[u8]> },
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub role: ModelRole,
    pub parts: Vec<ContentPart>,
    /// Ask the service for `application/json` output. The reply still goes
    /// through structured recovery; models do not always comply.
    pub json_response: bool,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>, json_response: bool) -> Self {
        Self {
            role: ModelRole::Text,
            parts: vec![ContentPart::Text(prompt.into())],
            json_response,
        }
    }

    pub fn vision(instruction: impl Into<String>, mime_type: &str, data: Arc<[u8]>) -> Self {
        Self {
            role: ModelRole::Vision,
            parts: vec![
                ContentPart::Text(instruction.into()),
                ContentPart::InlineData {
                    mime_type: mime_type.to_string(),
                    data,
                },
            ],
            json_response: false,
        }
    }
}

/// The seam between the matching core and the generative AI service.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CoreError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    Inline { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Gemini `generateContent` client with retry on rate limits and server errors.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    settings: RuntimeSettings,
}

impl GeminiClient {
    pub fn new(api_key: String, settings: RuntimeSettings) -> anyhow::Result<Self> {
        if api_key.trim().is_empty() {
            return Err(CoreError::MissingApiKey.into());
        }

        let client = Client::builder()
            .user_agent("JobMatcherDesktop/1.0")
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
            settings,
        })
    }

    fn model_for(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Vision => &self.settings.vision_model,
            ModelRole::Text => &self.settings.text_model,
        }
    }

    async fn generate_once(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<String, CoreError> {
        let url = format!(
            "{}/{}:generateContent",
            self.settings.api_endpoint.trim_end_matches('/'),
            model
        );

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(CoreError::ServiceCall {
                status: status.as_u16(),
                body: api_error_message(&text),
            });
        }

        let payload = serde_json::from_str::<GenerateContentResponse>(&text)
            .map_err(|err| CoreError::ServiceTransport(format!("invalid Gemini response: {err}")))?;
        response_text(payload)
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CoreError> {
        let model = self.model_for(request.role).to_string();
        let body = build_request_body(&request);
        let max_retries = self.settings.max_retries.max(1);

        let mut attempt = 0_usize;
        loop {
            match self.generate_once(&model, &body).await {
                Ok(text) => {
                    debug!(model = %model, chars = text.len(), "Gemini call succeeded");
                    return Ok(text);
                }
                Err(err) => {
                    let is_last_attempt = attempt + 1 >= max_retries;
                    if !err.is_retryable() || is_last_attempt {
                        return Err(err);
                    }

                    let backoff_seconds =
                        self.settings.retry_delay_seconds * 2_f64.powf(attempt as f64);
                    warn!(
                        model = %model,
                        attempt = attempt + 1,
                        "Gemini call failed ({err}), retrying after {backoff_seconds:.1}s"
                    );
                    tokio::time::sleep(Duration::from_secs_f64(backoff_seconds.max(0.1))).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn build_request_body(request: &GenerationRequest) -> GenerateContentRequest {
    let parts = request
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(text) => RequestPart::Text { text: text.clone() },
            ContentPart::InlineData { mime_type, data } => RequestPart::Inline {
                inline_data: InlineData {
                    mime_type: mime_type.clone(),
                    data: STANDARD.encode(data),
                },
            },
        })
        .collect();

    GenerateContentRequest {
        contents: vec![RequestContent {
            role: "user",
            parts,
        }],
        generation_config: request.json_response.then_some(GenerationConfig {
            response_mime_type: "application/json",
        }),
    }
}

/// Joins the text parts of the first candidate. No candidate at all is an
/// empty reply unless the prompt was blocked.
fn response_text(payload: GenerateContentResponse) -> Result<String, CoreError> {
    let Some(candidate) = payload.candidates.into_iter().next() else {
        if let Some(reason) = payload.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(CoreError::ServiceRefused(reason));
        }
        return Ok(String::new());
    };

    Ok(candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default())
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.to_string())
}
