use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;

use super::*;
use crate::error::{BackendError, BackendErrorKind, InvalidInputError};
use crate::prompt::Role;

const ENTANGLEMENT_JSON: &str = r#"{"topic":"quantum entanglement","summary":"...","sources":["a","b"],"toolsUsed":[]}"#;

#[derive(Default)]
struct MockModel {
    responses: Mutex<VecDeque<Result<RawModelOutput, BackendError>>>,
    prompts: Mutex<Vec<RenderedPrompt>>,
    calls: AtomicUsize,
}

impl MockModel {
    fn with_responses(responses: Vec<Result<RawModelOutput, BackendError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::from(responses)),
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_prompt(&self) -> Option<RenderedPrompt> {
        self.prompts.lock().expect("lock poisoned").last().cloned()
    }
}

#[async_trait]
impl ChatModel for MockModel {
    async fn invoke(&self, prompt: &RenderedPrompt) -> Result<RawModelOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("lock poisoned")
            .push(prompt.clone());

        let mut guard = self.responses.lock().expect("lock poisoned");
        guard.pop_front().unwrap_or_else(|| {
            Err(BackendError::provider_fault(
                "no more mock model responses",
            ))
        })
    }
}

struct PendingModel;

#[async_trait]
impl ChatModel for PendingModel {
    async fn invoke(&self, _prompt: &RenderedPrompt) -> Result<RawModelOutput, BackendError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(RawModelOutput::new(ENTANGLEMENT_JSON))
    }
}

fn pipeline_with(model: Arc<MockModel>) -> Pipeline {
    Pipeline::builder()
        .shared_model(model)
        .build()
        .expect("pipeline builds")
}

#[tokio::test]
async fn run_returns_validated_response() {
    let model = MockModel::with_responses(vec![Ok(RawModelOutput::new(ENTANGLEMENT_JSON))]);
    let pipeline = pipeline_with(model.clone());

    let response = pipeline
        .run("Summarize quantum entanglement", &[])
        .await
        .expect("run succeeds");

    assert_eq!(
        response,
        ResearchResponse {
            topic: "quantum entanglement".to_string(),
            summary: "...".to_string(),
            sources: vec!["a".to_string(), "b".to_string()],
            tools_used: vec![],
        }
    );
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn empty_query_fails_before_invoking_model() {
    let model = MockModel::with_responses(vec![Ok(RawModelOutput::new(ENTANGLEMENT_JSON))]);
    let pipeline = pipeline_with(model.clone());

    let err = pipeline.run("", &[]).await.expect_err("must fail");

    assert_eq!(err, PipelineError::Building(InvalidInputError::EmptyQuery));
    assert_eq!(err.stage(), PipelineStage::Building);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn auth_failure_short_circuits_before_parsing() {
    let model = MockModel::with_responses(vec![Err(BackendError::auth("invalid api key"))]);
    let pipeline = pipeline_with(model.clone());

    let events = pipeline
        .run_stream("Summarize quantum entanglement", &[])
        .collect::<Vec<_>>()
        .await;

    let err = events
        .last()
        .and_then(|event| event.as_ref().err())
        .cloned()
        .expect("stream ends with an error");
    assert_eq!(err.stage(), PipelineStage::Invoking);
    assert_eq!(err.backend_kind(), Some(BackendErrorKind::Auth));

    assert!(!events.iter().any(|event| matches!(
        event,
        Ok(PipelineEvent::StageStarted {
            stage: PipelineStage::Parsing
        })
    )));
}

#[tokio::test]
async fn run_stream_reports_each_stage_in_order() {
    let model = MockModel::with_responses(vec![Ok(RawModelOutput::new(ENTANGLEMENT_JSON))]);
    let pipeline = pipeline_with(model);

    let events = pipeline
        .run_stream("Summarize quantum entanglement", &[])
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("events ok");

    assert_eq!(events.len(), 5);
    assert_eq!(
        events[0],
        PipelineEvent::StageStarted {
            stage: PipelineStage::Building
        }
    );
    assert_eq!(
        events[1],
        PipelineEvent::StageStarted {
            stage: PipelineStage::Invoking
        }
    );
    assert_eq!(
        events[2],
        PipelineEvent::RawOutput {
            text: ENTANGLEMENT_JSON.to_string()
        }
    );
    assert_eq!(
        events[3],
        PipelineEvent::StageStarted {
            stage: PipelineStage::Parsing
        }
    );
    assert!(matches!(events[4], PipelineEvent::Completed { .. }));
}

#[tokio::test]
async fn nonconforming_output_fails_in_parsing_stage() {
    let raw = r#"{"topic":"quantum entanglement","summary":"..."}"#;
    let model = MockModel::with_responses(vec![Ok(RawModelOutput::new(raw))]);
    let pipeline = pipeline_with(model);

    let err = pipeline
        .run("Summarize quantum entanglement", &[])
        .await
        .expect_err("must fail");

    assert_eq!(err.stage(), PipelineStage::Parsing);
    let PipelineError::Parsing(parse_err) = err else {
        panic!("expected parse error")
    };
    assert_eq!(parse_err.raw, raw);
    assert_eq!(parse_err.reason, "missing required field: sources");
}

#[tokio::test]
async fn history_is_sent_between_system_and_query() {
    let model = MockModel::with_responses(vec![Ok(RawModelOutput::new(ENTANGLEMENT_JSON))]);
    let pipeline = pipeline_with(model.clone());

    let history = vec![
        ConversationTurn::human("What is superposition?"),
        ConversationTurn::assistant("A state that is a sum of states."),
    ];
    pipeline
        .run("Summarize quantum entanglement", &history)
        .await
        .expect("run succeeds");

    let prompt = model.last_prompt().expect("model saw a prompt");
    let roles = prompt
        .messages
        .iter()
        .map(|message| message.role)
        .collect::<Vec<_>>();
    assert_eq!(
        roles,
        vec![Role::System, Role::Human, Role::Assistant, Role::Human]
    );
    assert!(
        prompt
            .system_instruction()
            .is_some_and(|system| system.contains(&pipeline.format_instructions()))
    );
}

#[tokio::test]
async fn cancellation_surfaces_cancelled_backend_error() {
    let pipeline = Pipeline::builder()
        .model(PendingModel)
        .build()
        .expect("pipeline builds");

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let err = pipeline
        .run_with_cancel("Summarize quantum entanglement", &[], &token)
        .await
        .expect_err("must be cancelled");

    assert_eq!(err.stage(), PipelineStage::Invoking);
    assert_eq!(err.backend_kind(), Some(BackendErrorKind::Cancelled));
}

#[tokio::test]
async fn configured_timeout_cancels_slow_backend() {
    let pipeline = Pipeline::builder()
        .model(PendingModel)
        .timeout(Duration::from_millis(10))
        .build()
        .expect("pipeline builds");

    let err = pipeline
        .run("Summarize quantum entanglement", &[])
        .await
        .expect_err("must time out");

    assert_eq!(err.backend_kind(), Some(BackendErrorKind::Cancelled));
}

#[tokio::test]
async fn concurrent_runs_share_one_pipeline() {
    let model = MockModel::with_responses(vec![
        Ok(RawModelOutput::new(ENTANGLEMENT_JSON)),
        Ok(RawModelOutput::new(ENTANGLEMENT_JSON)),
    ]);
    let pipeline = pipeline_with(model.clone());

    let first = pipeline.clone();
    let second = pipeline.clone();
    let (a, b) = tokio::join!(
        async move { first.run("first query", &[]).await },
        async move { second.run("second query", &[]).await },
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(model.calls(), 2);
}

#[test]
fn build_without_model_is_config_error() {
    let err = Pipeline::builder().build().err().expect("must fail");
    assert!(matches!(err, ConfigError::MissingModel));
}
