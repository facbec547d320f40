//! Explicit backend configuration.
//!
//! Settings are read once at startup, from the process environment after an
//! optional `.env` file has been loaded, and then handed to the pipeline.
//! Missing or malformed values fail here, before any network call.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::{AnthropicModel, AnthropicModelConfig, ChatModel, OpenAiModel, OpenAiModelConfig};

pub const PROVIDER_VAR: &str = "RESEARCH_PROVIDER";
pub const MODEL_VAR: &str = "RESEARCH_MODEL";
pub const API_BASE_URL_VAR: &str = "RESEARCH_API_BASE_URL";
pub const MAX_TOKENS_VAR: &str = "RESEARCH_MAX_TOKENS";
pub const TEMPERATURE_VAR: &str = "RESEARCH_TEMPERATURE";
pub const TIMEOUT_SECS_VAR: &str = "RESEARCH_TIMEOUT_SECS";
pub const JSON_MODE_VAR: &str = "RESEARCH_JSON_MODE";

const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn api_key_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-5",
            Provider::Anthropic => "claude-sonnet-4-5",
        }
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        })
    }
}

#[derive(Clone)]
pub struct Settings {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub api_base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub timeout: Option<Duration>,
    pub json_mode: bool,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("json_mode", &self.json_mode)
            .finish()
    }
}

impl Settings {
    /// Loads `.env` if present, then reads settings from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let provider = match get(PROVIDER_VAR) {
            Some(value) => value.parse::<Provider>()?,
            None => Provider::OpenAi,
        };

        let api_key_var = provider.api_key_var();
        let api_key = get(api_key_var).ok_or(ConfigError::MissingVar(api_key_var))?;

        let model = get(MODEL_VAR).unwrap_or_else(|| provider.default_model().to_string());

        let max_tokens = match get(MAX_TOKENS_VAR) {
            Some(value) => parse_value::<u32>(MAX_TOKENS_VAR, &value)?,
            None => DEFAULT_MAX_TOKENS,
        };
        if max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                key: MAX_TOKENS_VAR,
                message: "must be greater than zero".to_string(),
            });
        }

        let temperature = get(TEMPERATURE_VAR)
            .map(|value| parse_value::<f32>(TEMPERATURE_VAR, &value))
            .transpose()?;

        let timeout = get(TIMEOUT_SECS_VAR)
            .map(|value| parse_value::<u64>(TIMEOUT_SECS_VAR, &value))
            .transpose()?
            .map(Duration::from_secs);
        if timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::InvalidValue {
                key: TIMEOUT_SECS_VAR,
                message: "must be greater than zero".to_string(),
            });
        }

        let json_mode = get(JSON_MODE_VAR)
            .map(|value| parse_value::<bool>(JSON_MODE_VAR, &value))
            .transpose()?
            .unwrap_or(false);

        Ok(Self {
            provider,
            model,
            api_key,
            api_base_url: get(API_BASE_URL_VAR),
            max_tokens,
            temperature,
            timeout,
            json_mode,
        })
    }

    /// Creates the configured backend.
    pub fn build_model(&self) -> Result<Arc<dyn ChatModel>, ConfigError> {
        match self.provider {
            Provider::OpenAi => {
                let mut config = OpenAiModelConfig::new(self.api_key.clone(), self.model.clone());
                config.api_base_url = self.api_base_url.clone();
                config.temperature = self.temperature;
                config.max_completion_tokens = Some(self.max_tokens);
                config.json_mode = self.json_mode;

                let model =
                    OpenAiModel::new(config).map_err(|err| ConfigError::Client(err.to_string()))?;
                Ok(Arc::new(model))
            }
            Provider::Anthropic => {
                let mut config =
                    AnthropicModelConfig::new(self.api_key.clone(), self.model.clone());
                config.api_base_url = self.api_base_url.clone();
                config.temperature = self.temperature;
                config.max_tokens = self.max_tokens;

                let model = AnthropicModel::new(config)
                    .map_err(|err| ConfigError::Client(err.to_string()))?;
                Ok(Arc::new(model))
            }
        }
    }
}

/// Loads variables from a `.env` file in the working directory or its
/// parents. Variables already set in the process take precedence.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded environment file"),
        Err(err) if err.not_found() => {}
        Err(err) => tracing::warn!(error = %err, "ignoring unreadable environment file"),
    }
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            message: format!("{value:?}: {err}"),
        })
}
