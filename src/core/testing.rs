//! Scripted stand-ins for the AI service, shared by the unit tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::CoreError;
use super::gemini_client::{ContentPart, GenerationRequest, GenerativeModel, ModelRole};
use super::models::UploadedFile;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

type Handler = Box<dyn Fn(&GenerationRequest) -> Result<String, CoreError> + Send + Sync>;
type DelayFn = Box<dyn Fn(&GenerationRequest) -> Duration + Send + Sync>;

pub struct ScriptedModel {
    handler: Handler,
    delay: DelayFn,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedModel {
    pub fn new(
        handler: impl Fn(&GenerationRequest) -> Result<String, CoreError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delay: Box::new(|_| Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(
        mut self,
        delay: impl Fn(&GenerationRequest) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CoreError> {
        let delay = (self.delay)(&request);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.calls.lock().unwrap().push(request.clone());
        (self.handler)(&request)
    }
}

/// A PNG upload whose body carries `content` so a scripted vision call can echo it back.
pub fn png_file(file_name: &str, content: &str) -> UploadedFile {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(content.as_bytes());
    UploadedFile::from_bytes(file_name, bytes)
}

/// The text embedded by [`png_file`] in a vision request.
pub fn image_payload(request: &GenerationRequest) -> Option<String> {
    request.parts.iter().find_map(|part| match part {
        ContentPart::InlineData { data, .. } => data
            .strip_prefix(PNG_SIGNATURE)
            .map(|rest| String::from_utf8_lossy(rest).to_string()),
        ContentPart::Text(_) => None,
    })
}

pub fn prompt_text(request: &GenerationRequest) -> String {
    request
        .parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text(text) => Some(text.as_str()),
            ContentPart::InlineData { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A model that echoes image payloads on vision calls and answers text calls with `reply`.
pub fn echo_vision_then(
    reply: impl Fn(&str) -> Result<String, CoreError> + Send + Sync + 'static,
) -> ScriptedModel {
    ScriptedModel::new(move |request| match request.role {
        ModelRole::Vision => Ok(image_payload(request).unwrap_or_default()),
        ModelRole::Text => reply(&prompt_text(request)),
    })
}
