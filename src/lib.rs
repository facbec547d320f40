//! Structured-output research queries over pluggable LLM backends.
//!
//! A [`Pipeline`] runs three stages for each query:
//! - builds a prompt whose system instruction embeds schema-derived format
//!   instructions, followed by the caller's chat history and the query
//! - submits it to a [`ChatModel`] backend (`OpenAiModel`, `AnthropicModel`,
//!   or any caller implementation)
//! - validates the raw reply into a [`ResearchResponse`]
//!
//! Any stage failure ends the run with a [`PipelineError`] naming the stage.

pub mod config;
pub mod error;
pub mod llm;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod schema;

pub use config::{Provider, Settings};
pub use error::{
    BackendError, BackendErrorKind, ConfigError, InvalidInputError, ParseError, PipelineError,
    PipelineStage,
};
pub use llm::{
    AnthropicModel, AnthropicModelConfig, ChatModel, ModelUsage, OpenAiModel, OpenAiModelConfig,
    RawModelOutput, invoke_with_limits,
};
pub use parser::OutputParser;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineConfig, PipelineEvent};
pub use prompt::{ConversationTurn, PromptBuilder, PromptMessage, RenderedPrompt, Role};
pub use schema::{FieldSpec, FieldType, ResearchResponse, ResponseShape, StructuredOutput};
