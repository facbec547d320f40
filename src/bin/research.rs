use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use research_pipeline_rs::config;
use research_pipeline_rs::{ConversationTurn, Pipeline, Settings};
use tracing_subscriber::EnvFilter;

/// Ask a research question and print the structured answer as JSON.
#[derive(Debug, Parser)]
#[command(name = "research", version)]
struct Cli {
    /// Query text; multiple words are joined with spaces.
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,

    /// JSON file holding prior conversation turns.
    #[arg(long)]
    history: Option<PathBuf>,

    /// Append this exchange to the history file.
    #[arg(long, requires = "history")]
    save_history: bool,

    /// Overrides RESEARCH_PROVIDER.
    #[arg(long)]
    provider: Option<String>,

    /// Overrides RESEARCH_MODEL.
    #[arg(long)]
    model: Option<String>,

    /// Overrides RESEARCH_TIMEOUT_SECS.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let query = cli.query.join(" ");

    let (pipeline, mut history) = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    let response = match pipeline.run(&query, &history).await {
        Ok(response) => response,
        Err(err) => {
            eprintln!("error ({} stage): {err}", err.stage());
            return ExitCode::from(1);
        }
    };

    let rendered = match serde_json::to_string_pretty(&response) {
        Ok(rendered) => rendered,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    };
    println!("{rendered}");

    if cli.save_history {
        if let Some(path) = &cli.history {
            history.push(ConversationTurn::human(query));
            history.push(ConversationTurn::assistant(rendered));
            if let Err(err) = save_history(path, &history) {
                eprintln!("error: could not save history: {err}");
                return ExitCode::from(2);
            }
        }
    }

    ExitCode::SUCCESS
}

fn prepare(cli: &Cli) -> Result<(Pipeline, Vec<ConversationTurn>), Box<dyn Error>> {
    config::load_dotenv();
    let mut settings = Settings::from_lookup(|key| match (key, &cli.provider) {
        (config::PROVIDER_VAR, Some(provider)) => Some(provider.clone()),
        _ => std::env::var(key).ok(),
    })?;
    if let Some(model) = &cli.model {
        settings.model = model.clone();
    }
    if let Some(secs) = cli.timeout_secs {
        settings.timeout = Some(Duration::from_secs(secs));
    }

    let history = match &cli.history {
        Some(path) => load_history(path)?,
        None => Vec::new(),
    };

    Ok((Pipeline::from_settings(&settings)?, history))
}

fn load_history(path: &Path) -> Result<Vec<ConversationTurn>, Box<dyn Error>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&text)?)
}

fn save_history(path: &Path, history: &[ConversationTurn]) -> Result<(), Box<dyn Error>> {
    fs::write(path, serde_json::to_string_pretty(history)?)?;
    Ok(())
}
