use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BackendError, BackendErrorKind};
use crate::llm::{ChatModel, ModelUsage, RawModelOutput};
use crate::prompt::{RenderedPrompt, Role};

const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Runtime configuration for [`OpenAiModel`].
#[derive(Debug, Clone)]
pub struct OpenAiModelConfig {
    pub api_key: String,
    pub model: String,
    /// Base URL override for proxies or OpenAI-compatible endpoints.
    pub api_base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_completion_tokens: Option<u32>,
    /// Requests `response_format: json_object` from the endpoint.
    pub json_mode: bool,
}

impl OpenAiModelConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_base_url: None,
            temperature: None,
            max_completion_tokens: Some(4096),
            json_mode: false,
        }
    }
}

/// Chat-completions backend for OpenAI and compatible providers.
#[derive(Debug, Clone)]
pub struct OpenAiModel {
    client: Client,
    config: OpenAiModelConfig,
}

impl OpenAiModel {
    pub fn new(config: OpenAiModelConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .build()
            .map_err(|err| BackendError::provider_fault(err.to_string()))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    async fn invoke(&self, prompt: &RenderedPrompt) -> Result<RawModelOutput, BackendError> {
        let request = build_request(prompt, &self.config);

        tracing::debug!(
            endpoint = %self.endpoint(),
            model = %self.config.model,
            messages = request.messages.len(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| BackendError::network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::new(
                classify_status(status),
                describe_failure(status, &body),
            ));
        }

        let payload = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| BackendError::provider_fault(format!("unreadable response: {err}")))?;

        normalize_response(payload)
    }
}

/// Maps a non-success HTTP status to a backend error kind.
pub(crate) fn classify_status(status: StatusCode) -> BackendErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendErrorKind::Auth,
        StatusCode::TOO_MANY_REQUESTS => BackendErrorKind::RateLimited,
        _ => BackendErrorKind::ProviderFault,
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    type_: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<Value>,
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Human => "user",
        Role::Assistant => "assistant",
    }
}

fn build_request(prompt: &RenderedPrompt, config: &OpenAiModelConfig) -> ChatCompletionRequest {
    let messages = prompt
        .messages
        .iter()
        .filter(|message| !message.content.is_empty())
        .map(|message| RequestMessage {
            role: role_name(message.role),
            content: message.content.clone(),
        })
        .collect::<Vec<_>>();

    ChatCompletionRequest {
        model: config.model.clone(),
        messages,
        temperature: config.temperature,
        max_completion_tokens: config.max_completion_tokens,
        response_format: config.json_mode.then_some(ResponseFormat {
            type_: "json_object",
        }),
    }
}

fn normalize_response(response: ChatCompletionResponse) -> Result<RawModelOutput, BackendError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::provider_fault("response missing choices"))?;

    let message = choice
        .message
        .ok_or_else(|| BackendError::provider_fault("response missing choice message"))?;

    if let Some(refusal) = message.refusal.filter(|text| !text.is_empty()) {
        return Err(BackendError::provider_fault(format!(
            "model refused: {refusal}"
        )));
    }

    let text = message
        .content
        .filter(|text| !text.is_empty())
        .ok_or_else(|| BackendError::provider_fault("response contained no text"))?;

    let usage = response.usage.map(|usage| ModelUsage {
        input_tokens: usage.prompt_tokens.unwrap_or(0),
        output_tokens: usage.completion_tokens.unwrap_or(0),
    });

    Ok(RawModelOutput { text, usage })
}

/// Message for a rejected request. The provider's own explanation is kept
/// when the body is an OpenAI-style error envelope.
fn describe_failure(status: StatusCode, body: &str) -> String {
    let reason = match classify_status(status) {
        BackendErrorKind::Auth => "credentials rejected",
        BackendErrorKind::RateLimited => "rate limited",
        _ => "endpoint failed",
    };
    let mut message = format!("{reason} (HTTP {}", status.as_u16());

    let detail = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error }) => {
            let code = error
                .code
                .map(|code| match code {
                    Value::String(code) => code,
                    other => other.to_string(),
                })
                .or(error.type_);
            if let Some(code) = code {
                message.push_str(", ");
                message.push_str(&code);
            }
            error.message
        }
        Err(_) => Some(body.trim().to_string()).filter(|body| !body.is_empty()),
    };
    message.push(')');

    if let Some(detail) = detail {
        message.push_str(": ");
        message.push_str(&detail);
    }
    message
}
