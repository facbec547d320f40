use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidInputError {
    #[error("query must not be empty")]
    EmptyQuery,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    Network,
    Auth,
    RateLimited,
    ProviderFault,
    Cancelled,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendErrorKind::Network => "network",
            BackendErrorKind::Auth => "auth",
            BackendErrorKind::RateLimited => "rate_limited",
            BackendErrorKind::ProviderFault => "provider_fault",
            BackendErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Failure reported by a [`ChatModel`](crate::llm::ChatModel) backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("backend {kind} error: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Auth, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::RateLimited, message)
    }

    pub fn provider_fault(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ProviderFault, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Cancelled, message)
    }

    /// Whether a caller-side backoff retry is worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            BackendErrorKind::Network | BackendErrorKind::RateLimited
        )
    }
}

/// Model output that did not conform to the expected response shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("model output did not match schema: {reason}")]
pub struct ParseError {
    pub raw: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required configuration is not set: {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("backend client could not be created: {0}")]
    Client(String),
    #[error("pipeline model must be configured via PipelineBuilder::model(...)")]
    MissingModel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Building,
    Invoking,
    Parsing,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Building => "building",
            PipelineStage::Invoking => "invoking",
            PipelineStage::Parsing => "parsing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("building stage failed: {0}")]
    Building(#[from] InvalidInputError),
    #[error("invoking stage failed: {0}")]
    Invoking(#[from] BackendError),
    #[error("parsing stage failed: {0}")]
    Parsing(#[from] ParseError),
}

impl PipelineError {
    /// Stage the run was in when it failed.
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::Building(_) => PipelineStage::Building,
            PipelineError::Invoking(_) => PipelineStage::Invoking,
            PipelineError::Parsing(_) => PipelineStage::Parsing,
        }
    }

    pub fn backend_kind(&self) -> Option<BackendErrorKind> {
        match self {
            PipelineError::Invoking(err) => Some(err.kind),
            PipelineError::Building(_) | PipelineError::Parsing(_) => None,
        }
    }
}
