use std::sync::LazyLock;

use anthropic_ai_sdk::client::AnthropicClient;
use anthropic_ai_sdk::types::message::{
    ContentBlock, CreateMessageParams, CreateMessageResponse, Message, MessageClient, MessageError,
    RequiredMessageParams, Role as AnthropicRole,
};
use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;

use crate::error::{BackendError, BackendErrorKind};
use crate::llm::openai::classify_status;
use crate::llm::{ChatModel, ModelUsage, RawModelOutput};
use crate::prompt::{RenderedPrompt, Role};

#[derive(Debug, Clone)]
/// Runtime configuration for [`AnthropicModel`].
pub struct AnthropicModelConfig {
    /// Anthropic API key.
    pub api_key: String,
    /// Model id (for example `claude-sonnet-4-5`).
    pub model: String,
    /// Anthropic API version header value.
    pub api_version: String,
    /// Optional base URL override for proxies or compatible endpoints.
    pub api_base_url: Option<String>,
    /// Maximum output tokens per call.
    pub max_tokens: u32,
    /// Optional sampling temperature.
    pub temperature: Option<f32>,
}

impl AnthropicModelConfig {
    /// Creates a config with sensible defaults.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_version: AnthropicClient::DEFAULT_API_VERSION.to_string(),
            api_base_url: None,
            max_tokens: 4096,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone)]
/// Anthropic Messages API backend implementing [`ChatModel`].
pub struct AnthropicModel {
    client: AnthropicClient,
    config: AnthropicModelConfig,
}

impl AnthropicModel {
    /// Creates a backend from explicit config.
    pub fn new(config: AnthropicModelConfig) -> Result<Self, BackendError> {
        let mut builder =
            AnthropicClient::builder(config.api_key.clone(), config.api_version.clone());
        if let Some(url) = &config.api_base_url {
            builder = builder.with_api_base_url(url.clone());
        }

        let client = builder
            .build::<MessageError>()
            .map_err(|err| BackendError::provider_fault(err.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl ChatModel for AnthropicModel {
    async fn invoke(&self, prompt: &RenderedPrompt) -> Result<RawModelOutput, BackendError> {
        let (history, system) = to_anthropic_messages(prompt);

        tracing::debug!(
            model = %self.config.model,
            messages = history.len(),
            "sending anthropic message request"
        );

        let required = RequiredMessageParams {
            model: self.config.model.clone(),
            messages: history,
            max_tokens: self.config.max_tokens,
        };

        let mut request = CreateMessageParams::new(required).with_stream(false);

        if let Some(system_prompt) = system {
            request = request.with_system(system_prompt);
        }

        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        let response = self
            .client
            .create_message(Some(&request))
            .await
            .map_err(|err| {
                let message = err.to_string();
                BackendError::new(classify_sdk_error(&message), message)
            })?;

        normalize_response(&response)
    }
}

static ERROR_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-z_]+_error)\b").expect("error type pattern is valid"));

static STATUS_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bstatus(?:\s+code)?\s*[:=]?\s*(\d{3})\b").expect("status pattern is valid")
});

const NETWORK_PHRASES: &[&str] = &[
    "error sending request",
    "dns error",
    "connection refused",
    "connection reset",
    "connection closed",
    "operation timed out",
];

/// The SDK reports failures as text, usually the raw error body. The kind is
/// taken from the Anthropic error type when one is present, then from an
/// explicit `status: NNN`, then from transport failure phrases.
pub(crate) fn classify_sdk_error(message: &str) -> BackendErrorKind {
    let from_type = ERROR_TYPE
        .captures_iter(message)
        .find_map(|caps| kind_for_error_type(&caps[1]));
    if let Some(kind) = from_type {
        return kind;
    }

    let from_status = STATUS_CODE
        .captures(message)
        .and_then(|caps| caps[1].parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .map(classify_status);
    if let Some(kind) = from_status {
        return kind;
    }

    let lowered = message.to_ascii_lowercase();
    if NETWORK_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        BackendErrorKind::Network
    } else {
        BackendErrorKind::ProviderFault
    }
}

fn kind_for_error_type(error_type: &str) -> Option<BackendErrorKind> {
    match error_type {
        "authentication_error" | "permission_error" => Some(BackendErrorKind::Auth),
        "rate_limit_error" => Some(BackendErrorKind::RateLimited),
        "api_error" | "overloaded_error" | "invalid_request_error" | "not_found_error" => {
            Some(BackendErrorKind::ProviderFault)
        }
        _ => None,
    }
}

fn to_anthropic_messages(prompt: &RenderedPrompt) -> (Vec<Message>, Option<String>) {
    let mut system_lines = Vec::new();
    let mut anthropic_messages = Vec::new();

    for message in &prompt.messages {
        if message.content.is_empty() {
            continue;
        }
        match message.role {
            Role::System => system_lines.push(message.content.clone()),
            Role::Human => {
                anthropic_messages.push(Message::new_text(
                    AnthropicRole::User,
                    message.content.clone(),
                ));
            }
            Role::Assistant => {
                anthropic_messages.push(Message::new_text(
                    AnthropicRole::Assistant,
                    message.content.clone(),
                ));
            }
        }
    }

    let system = if system_lines.is_empty() {
        None
    } else {
        Some(system_lines.join("\n\n"))
    };

    (anthropic_messages, system)
}

fn normalize_response(response: &CreateMessageResponse) -> Result<RawModelOutput, BackendError> {
    let text_parts = response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();

    if text_parts.is_empty() {
        return Err(BackendError::provider_fault("response contained no text"));
    }

    Ok(RawModelOutput {
        text: text_parts.join("\n"),
        usage: Some(ModelUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        }),
    })
}
