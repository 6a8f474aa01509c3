//! Run one bounded tool-calling loop against OpenRouter and print the answer.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable. Log
//! verbosity follows `RUST_LOG` (default `steerloop=info`).
//!
//! # Examples
//!
//! ```sh
//! # Chat mode: routed, with admin overrides from a file
//! steerloop "Why does the export job time out?" --overrides overrides.json
//!
//! # Pin the model and attach metadata
//! steerloop "Summarize issue 412" --model openai/gpt-4o \
//!   --context '{"tenant": "acme"}' --thread-title "Export times out"
//!
//! # Admin mode: static instructions and a fixed step cap
//! cat task.md | steerloop --stdin --mode admin --max-steps 25 \
//!   --instructions "You maintain the knowledge base."
//! ```

use clap::{Parser, ValueEnum};
use std::io::{self, Read};
use std::process;
use steerloop::agent::{LoopMode, LoopResult};
use steerloop::api::router::ThreadMetadata;
use steerloop::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Chat,
    Admin,
}

impl From<ModeArg> for LoopMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Chat => LoopMode::Chat,
            ModeArg::Admin => LoopMode::Admin,
        }
    }
}

/// Run a bounded tool-calling loop and print the final answer.
///
/// Reads the API key from the OPENROUTER_KEY environment variable.
#[derive(Parser)]
#[command(name = "steerloop")]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// The user's question or task
    prompt: Option<String>,

    /// Read the prompt (or extra context appended to it) from stdin
    #[arg(long)]
    stdin: bool,

    // ── Loop ───────────────────────────────────────────────────
    /// Loop variant
    #[arg(long, value_enum, default_value_t = ModeArg::Chat)]
    mode: ModeArg,

    /// Model override; wins over the router and admin overrides
    #[arg(long)]
    model: Option<String>,

    /// Step cap (admin mode only; chat mode derives it from the router)
    #[arg(long)]
    max_steps: Option<u32>,

    /// Instructions (chat mode: base instructions, admin mode: the full prompt)
    #[arg(long, default_value = "You are a helpful assistant.")]
    instructions: String,

    /// Path to a JSON file with admin overrides (chat mode)
    #[arg(long)]
    overrides: Option<String>,

    // ── Call metadata ──────────────────────────────────────────
    /// Custom context as a JSON object, forwarded with every model call
    #[arg(long)]
    context: Option<String>,

    /// Thread title given to the router
    #[arg(long)]
    thread_title: Option<String>,

    /// Thread labels given to the router
    #[arg(long = "thread-label")]
    thread_labels: Vec<String>,

    // ── Output ─────────────────────────────────────────────────
    /// Print the full run result as JSON
    #[arg(long)]
    json: bool,
}

// ── Helpers ────────────────────────────────────────────────────────

fn read_stdin_content() -> Result<String, String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    Ok(buf)
}

fn build_prompt(cli: &Cli) -> Result<String, String> {
    let stdin_text = if cli.stdin {
        Some(read_stdin_content()?)
    } else {
        None
    };

    match (&cli.prompt, stdin_text) {
        (Some(msg), Some(piped)) => Ok(format!("{msg}\n\n{piped}")),
        (Some(msg), None) => Ok(msg.clone()),
        (None, Some(piped)) => Ok(piped),
        (None, None) => Err("provide a prompt, --stdin, or both".to_string()),
    }
}

fn build_options(cli: &Cli) -> Result<RunOptions, String> {
    let mut options = serde_json::Map::new();
    if let Some(model) = &cli.model {
        options.insert("model".into(), model.clone().into());
    }
    if let Some(raw) = &cli.context {
        let context: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| format!("invalid --context JSON: {e}"))?;
        options.insert("customContext".into(), context);
    }
    if cli.thread_title.is_some() || !cli.thread_labels.is_empty() {
        let thread = ThreadMetadata {
            title: cli.thread_title.clone(),
            labels: cli.thread_labels.clone(),
            ..Default::default()
        };
        let thread =
            serde_json::to_value(thread).map_err(|e| format!("failed to encode thread: {e}"))?;
        options.insert("thread".into(), thread);
    }
    RunOptions::from_value(serde_json::Value::Object(options))
}

fn build_config(cli: &Cli) -> LoopConfig {
    match LoopMode::from(cli.mode) {
        LoopMode::Chat => {
            if cli.max_steps.is_some() {
                warn!("--max-steps is ignored in chat mode");
            }
            LoopConfig::Chat(ChatLoopConfig::new(&cli.instructions))
        }
        LoopMode::Admin => {
            let mut config = AdminLoopConfig::new(&cli.instructions);
            if let Some(max_steps) = cli.max_steps {
                config = config.with_max_steps(max_steps);
            }
            LoopConfig::Admin(config)
        }
    }
}

fn render(result: &LoopResult, json: bool) -> Result<String, String> {
    if !json {
        return Ok(result.text.clone());
    }
    let value = serde_json::json!({
        "traceId": result.trace_id,
        "text": result.text,
        "finish": result.finish,
        "model": result.model,
        "maxSteps": result.max_steps,
        "steps": result.steps,
        "totalUsage": result.total_usage,
        "estimatedCostUsd": result.estimated_cost_usd,
    });
    serde_json::to_string_pretty(&value).map_err(|e| format!("failed to format result: {e}"))
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            token.cancel();
        }
    });
}

async fn run(cli: &Cli) -> Result<String, String> {
    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "OPENROUTER_KEY environment variable is not set".to_string())?;

    let prompt = build_prompt(cli)?;
    let options = build_options(cli)?;
    let config = build_config(cli);

    let client = OpenRouterClient::new(api_key)?;
    let tools = ToolSet::new().with(ThinkTool);
    let overrides = cli.overrides.as_ref().map(FileOverridesProvider::new);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut driver = LoopDriver::new(&client, &tools, config)
        .with_event_handler(&LoggingHandler)
        .with_cancellation(cancel);
    if let Some(provider) = &overrides {
        driver = driver.with_overrides_provider(provider);
    }

    let result = driver
        .run(vec![Message::user(prompt)], options)
        .await
        .map_err(|e| e.to_string())?;

    if result.finish == FinishReason::Cancelled {
        warn!("Run cancelled after {} step(s)", result.steps.len());
    }
    render(&result, cli.json)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("steerloop=info")))
        .init();

    match run(&cli).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
