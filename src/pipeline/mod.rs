use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::Settings;
use crate::error::{ConfigError, PipelineError, PipelineStage};
use crate::llm::{ChatModel, RawModelOutput, invoke_with_limits};
use crate::parser::OutputParser;
use crate::prompt::{ConversationTurn, PromptBuilder, RenderedPrompt};
use crate::schema::ResearchResponse;

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Deadline applied to the backend call.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageStarted { stage: PipelineStage },
    RawOutput { text: String },
    Completed { response: ResearchResponse },
}

#[derive(Default)]
pub struct PipelineBuilder {
    model: Option<Arc<dyn ChatModel>>,
    prompt_builder: PromptBuilder,
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn model<M>(mut self, model: M) -> Self
    where
        M: ChatModel + 'static,
    {
        self.model = Some(Arc::new(model));
        self
    }

    pub fn shared_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn system_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_builder = PromptBuilder::with_system_template(template);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Pipeline, ConfigError> {
        let Some(model) = self.model else {
            return Err(ConfigError::MissingModel);
        };

        Ok(Pipeline {
            model,
            prompt_builder: self.prompt_builder,
            parser: OutputParser::new(),
            config: self.config,
        })
    }
}

/// Prompt building, backend invocation and output parsing for one research
/// query at a time. Holds no per-run state.
#[derive(Clone)]
pub struct Pipeline {
    model: Arc<dyn ChatModel>,
    prompt_builder: PromptBuilder,
    parser: OutputParser<ResearchResponse>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Wires the backend and deadline described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut builder = Pipeline::builder().shared_model(settings.build_model()?);
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        builder.build()
    }

    pub fn format_instructions(&self) -> String {
        self.parser.format_instructions()
    }

    pub async fn run(
        &self,
        query: &str,
        chat_history: &[ConversationTurn],
    ) -> Result<ResearchResponse, PipelineError> {
        self.execute(query, chat_history, None).await
    }

    /// Like [`Pipeline::run`], but the backend call is abandoned with a
    /// `Cancelled` error once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        query: &str,
        chat_history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<ResearchResponse, PipelineError> {
        self.execute(query, chat_history, Some(cancel)).await
    }

    pub fn run_stream<'a>(
        &'a self,
        query: &'a str,
        chat_history: &'a [ConversationTurn],
    ) -> impl Stream<Item = Result<PipelineEvent, PipelineError>> + 'a {
        self.stream_stages(query, chat_history, None)
    }

    async fn execute(
        &self,
        query: &str,
        chat_history: &[ConversationTurn],
        cancel: Option<&CancellationToken>,
    ) -> Result<ResearchResponse, PipelineError> {
        let span = tracing::info_span!("research_pipeline", history = chat_history.len());

        async {
            let prompt = self.build_prompt(query, chat_history)?;
            let output = self.invoke(&prompt, cancel).await?;
            self.parse(&output)
        }
        .instrument(span)
        .await
    }

    fn stream_stages<'a>(
        &'a self,
        query: &'a str,
        chat_history: &'a [ConversationTurn],
        cancel: Option<&'a CancellationToken>,
    ) -> impl Stream<Item = Result<PipelineEvent, PipelineError>> + 'a {
        stream! {
            yield Ok(PipelineEvent::StageStarted { stage: PipelineStage::Building });
            let prompt = match self.build_prompt(query, chat_history) {
                Ok(prompt) => prompt,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            yield Ok(PipelineEvent::StageStarted { stage: PipelineStage::Invoking });
            let output = match self.invoke(&prompt, cancel).await {
                Ok(output) => output,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            yield Ok(PipelineEvent::RawOutput { text: output.text.clone() });

            yield Ok(PipelineEvent::StageStarted { stage: PipelineStage::Parsing });
            match self.parse(&output) {
                Ok(response) => {
                    yield Ok(PipelineEvent::Completed { response });
                }
                Err(err) => {
                    yield Err(err);
                }
            }
        }
    }

    fn build_prompt(
        &self,
        query: &str,
        chat_history: &[ConversationTurn],
    ) -> Result<RenderedPrompt, PipelineError> {
        let prompt = self
            .prompt_builder
            .build(query, chat_history, &self.parser.format_instructions())
            .inspect_err(|err| tracing::warn!(error = %err, "rejected query"))?;

        tracing::debug!(messages = prompt.messages.len(), "prompt built");
        Ok(prompt)
    }

    async fn invoke(
        &self,
        prompt: &RenderedPrompt,
        cancel: Option<&CancellationToken>,
    ) -> Result<RawModelOutput, PipelineError> {
        let output = invoke_with_limits(self.model.as_ref(), prompt, cancel, self.config.timeout)
            .await
            .inspect_err(|err| {
                tracing::warn!(
                    kind = %err.kind,
                    retryable = err.is_retryable(),
                    error = %err.message,
                    "backend invocation failed"
                )
            })?;

        match &output.usage {
            Some(usage) => tracing::debug!(
                chars = output.text.len(),
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "backend replied"
            ),
            None => tracing::debug!(chars = output.text.len(), "backend replied"),
        }

        Ok(output)
    }

    fn parse(&self, output: &RawModelOutput) -> Result<ResearchResponse, PipelineError> {
        let response = self
            .parser
            .parse(&output.text)
            .inspect_err(|err| tracing::warn!(reason = %err.reason, "model output rejected"))?;

        tracing::info!(
            topic = %response.topic,
            sources = response.sources.len(),
            "research query completed"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests;
