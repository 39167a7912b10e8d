use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tessera_engine::{ActionExecutor, ActionOutcome, DataSourceEngine, RuntimeContext, load_schema_file};
use tessera_types::Schema;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tessera", version, about = "Run Tessera schemas from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a named handler and print the outcome and final state
    Run {
        /// Schema document (YAML or JSON)
        schema: PathBuf,
        #[arg(long)]
        handler: String,
        /// JSON file with the initial state
        #[arg(long)]
        state: Option<PathBuf>,
        /// Triggering payload as inline JSON
        #[arg(long)]
        data: Option<String>,
    },
    /// Mount every data source and print each result update
    Watch {
        schema: PathBuf,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        seconds: Option<u64>,
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Resolve a binding against a state file
    Resolve {
        /// A binding string, or any JSON value containing bindings
        binding: String,
        #[arg(long)]
        state: Option<PathBuf>,
        /// Schema supplying runtime settings
        #[arg(long)]
        schema: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    match Cli::parse().command {
        Command::Run {
            schema,
            handler,
            state,
            data,
        } => run_handler(schema, &handler, state, data).await,
        Command::Watch { schema, seconds, state } => watch(schema, seconds, state).await,
        Command::Resolve { binding, state, schema } => resolve(&binding, state, schema),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn read_state(path: Option<&PathBuf>) -> Result<Value> {
    let Some(path) = path else {
        return Ok(json!({}));
    };
    let content = fs::read_to_string(path).with_context(|| format!("failed to read state file: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("state file is not valid JSON: {}", path.display()))
}

fn context(schema: Schema, state: Option<&PathBuf>) -> Result<std::sync::Arc<RuntimeContext>> {
    RuntimeContext::builder(schema).initial_state(read_state(state)?).build()
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn outcome_json(outcome: &ActionOutcome) -> Value {
    match outcome {
        ActionOutcome::Succeeded(value) => json!({ "status": "succeeded", "result": value }),
        ActionOutcome::Failed(message) => json!({ "status": "failed", "error": message }),
        ActionOutcome::Cancelled => json!({ "status": "cancelled" }),
    }
}

/// Parses `raw` as JSON, falling back to a plain string.
fn parse_binding(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn run_handler(schema_path: PathBuf, handler: &str, state: Option<PathBuf>, data: Option<String>) -> Result<()> {
    let schema = load_schema_file(&schema_path)?;
    let data = data
        .map(|raw| serde_json::from_str::<Value>(&raw).context("--data is not valid JSON"))
        .transpose()?;
    let ctx = context(schema, state.as_ref())?;
    let executor = ActionExecutor::new(ctx.clone());

    let execution = executor.execute_named(handler, data);
    tokio::pin!(execution);
    let outcome = tokio::select! {
        outcome = &mut execution => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; cancelling");
            executor.teardown();
            execution.await
        }
    };

    // Streaming handlers keep their sockets open after succeeding.
    if outcome.is_success() && ctx.invocations().active() > 0 {
        info!(streams = ctx.invocations().active(), "streaming; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
        executor.teardown();
    }

    print_json(&json!({
        "outcome": outcome_json(&outcome),
        "state": ctx.state().snapshot(),
    }))?;
    if let ActionOutcome::Failed(message) = outcome {
        anyhow::bail!("handler '{handler}' failed: {message}");
    }
    Ok(())
}

async fn watch(schema_path: PathBuf, seconds: Option<u64>, state: Option<PathBuf>) -> Result<()> {
    let schema = load_schema_file(&schema_path)?;
    let ctx = context(schema, state.as_ref())?;
    let engine = DataSourceEngine::new(ctx.clone());
    let mut updates = ctx.results().subscribe();

    let mounted = engine.mount();
    info!(mounted, "watching data sources");

    let deadline = async {
        match seconds {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => print_json(&json!({ "id": update.id, "value": update.value }))?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "watcher fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    engine.teardown().await;
    Ok(())
}

fn resolve(binding: &str, state: Option<PathBuf>, schema_path: Option<PathBuf>) -> Result<()> {
    let schema = match schema_path {
        Some(path) => load_schema_file(path)?,
        None => Schema::default(),
    };
    let ctx = context(schema, state.as_ref())?;
    print_json(&ctx.deep_resolve(&parse_binding(binding), None))
}
