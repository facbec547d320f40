//! Runs the `research` binary against a mocked chat-completions endpoint.

#![cfg(feature = "cli")]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use research_pipeline_rs::{ConversationTurn, Role};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CLEARED_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "RESEARCH_PROVIDER",
    "RESEARCH_MODEL",
    "RESEARCH_API_BASE_URL",
    "RESEARCH_MAX_TOKENS",
    "RESEARCH_TEMPERATURE",
    "RESEARCH_TIMEOUT_SECS",
    "RESEARCH_JSON_MODE",
    "RUST_LOG",
];

const REPLY: &str =
    "{\"topic\":\"tides\",\"summary\":\"The moon pulls water.\",\"sources\":[],\"toolsUsed\":[]}";

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-cli",
        "object": "chat.completion",
        "model": "gpt-5",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

/// Runs in an empty directory so no `.env` file is picked up.
fn research(workdir: &Path, server: Option<&MockServer>) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_research"));
    command.current_dir(workdir);
    for var in CLEARED_VARS {
        command.env_remove(var);
    }
    if let Some(server) = server {
        command
            .env("OPENAI_API_KEY", "sk-test")
            .env("RESEARCH_API_BASE_URL", server.uri());
    }
    command
}

async fn output_of(mut command: Command) -> Output {
    tokio::task::spawn_blocking(move || command.output())
        .await
        .expect("blocking task joins")
        .expect("binary runs")
}

async fn mount_reply(server: &MockServer, status: u16, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn successful_run_prints_response_and_exits_zero() {
    let server = MockServer::start().await;
    mount_reply(&server, 200, completion_body(REPLY)).await;
    let workdir = TempDir::new().expect("tempdir");

    let mut command = research(workdir.path(), Some(&server));
    command.args(["Why", "are", "there", "tides?"]);
    let output = output_of(command).await;

    assert_eq!(output.status.code(), Some(0));
    let printed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(printed["topic"], "tides");
    assert_eq!(printed["toolsUsed"], json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn backend_rejection_exits_one() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        401,
        json!({"error": {"message": "Incorrect API key provided", "code": "invalid_api_key"}}),
    )
    .await;
    let workdir = TempDir::new().expect("tempdir");

    let mut command = research(workdir.path(), Some(&server));
    command.arg("Why are there tides?");
    let output = output_of(command).await;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invoking stage"), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_api_key_exits_two() {
    let workdir = TempDir::new().expect("tempdir");

    let mut command = research(workdir.path(), None);
    command.arg("Why are there tides?");
    let output = output_of(command).await;

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("OPENAI_API_KEY"), "stderr: {stderr}");
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_timeout_flag_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(REPLY)))
        .expect(0)
        .mount(&server)
        .await;
    let workdir = TempDir::new().expect("tempdir");

    let mut command = research(workdir.path(), Some(&server));
    command.args(["--timeout-secs", "0", "Why are there tides?"]);
    let output = output_of(command).await;

    assert_eq!(output.status.code(), Some(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn save_history_appends_query_and_answer() {
    let server = MockServer::start().await;
    mount_reply(&server, 200, completion_body(REPLY)).await;
    let workdir = TempDir::new().expect("tempdir");
    let history_path = workdir.path().join("history.json");
    let earlier = vec![
        ConversationTurn::human("What is the moon made of?"),
        ConversationTurn::assistant("Mostly rock."),
    ];
    fs::write(
        &history_path,
        serde_json::to_string(&earlier).expect("history serializes"),
    )
    .expect("history written");

    let mut command = research(workdir.path(), Some(&server));
    command
        .arg("--history")
        .arg(&history_path)
        .arg("--save-history")
        .arg("Why are there tides?");
    let output = output_of(command).await;
    assert_eq!(output.status.code(), Some(0));

    let saved: Vec<ConversationTurn> =
        serde_json::from_str(&fs::read_to_string(&history_path).expect("history readable"))
            .expect("history parses");

    assert_eq!(saved.len(), earlier.len() + 2);
    assert_eq!(saved[..2], earlier[..]);
    assert_eq!(saved[2], ConversationTurn::human("Why are there tides?"));
    assert_eq!(saved[3].role, Role::Assistant);
    let answer: serde_json::Value =
        serde_json::from_str(&saved[3].text).expect("assistant turn holds JSON");
    assert_eq!(answer["topic"], "tides");
}

#[tokio::test(flavor = "multi_thread")]
async fn history_is_sent_but_left_unchanged_without_save_flag() {
    let server = MockServer::start().await;
    mount_reply(&server, 200, completion_body(REPLY)).await;
    let workdir = TempDir::new().expect("tempdir");
    let history_path = workdir.path().join("history.json");
    let earlier = vec![ConversationTurn::human("hello")];
    let original = serde_json::to_string(&earlier).expect("history serializes");
    fs::write(&history_path, &original).expect("history written");

    let mut command = research(workdir.path(), Some(&server));
    command
        .arg("--history")
        .arg(&history_path)
        .arg("Why are there tides?");
    let output = output_of(command).await;

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        fs::read_to_string(&history_path).expect("history readable"),
        original
    );
}
