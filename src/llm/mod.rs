mod anthropic;
mod openai;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;
use crate::prompt::RenderedPrompt;

pub use anthropic::{AnthropicModel, AnthropicModelConfig};
pub use openai::{OpenAiModel, OpenAiModelConfig};

/// Unvalidated text returned by a backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawModelOutput {
    pub text: String,
    pub usage: Option<ModelUsage>,
}

impl RawModelOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A language-model backend. Implementations hold no per-call state, so one
/// instance may serve concurrent invocations.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(&self, prompt: &RenderedPrompt) -> Result<RawModelOutput, BackendError>;
}

/// Invokes `model`, failing with a `Cancelled` backend error if `cancel`
/// fires or `deadline` elapses first. Dropping the in-flight call aborts it.
pub async fn invoke_with_limits(
    model: &dyn ChatModel,
    prompt: &RenderedPrompt,
    cancel: Option<&CancellationToken>,
    deadline: Option<Duration>,
) -> Result<RawModelOutput, BackendError> {
    let call = async {
        match deadline {
            Some(limit) => match tokio::time::timeout(limit, model.invoke(prompt)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::cancelled(format!(
                    "deadline of {} ms exceeded",
                    limit.as_millis()
                ))),
            },
            None => model.invoke(prompt).await,
        }
    };

    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(BackendError::cancelled("invocation cancelled by caller")),
                result = call => result,
            }
        }
        None => call.await,
    }
}
