//! `assistant` — text front end for the routing runtime.
//!
//! Reads one utterance per line and prints the response with the tier that
//! answered it. Slash commands expose the diagnostics interface.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use assistant_runtime::agent_core::{ControllerError, ExecutionController, ExecutionResult};
use assistant_runtime::config::RuntimeConfig;
use assistant_runtime::tools::{register_builtin_tools, ToolCatalog};

/// Adaptive query routing runtime
#[derive(Parser)]
#[command(name = "assistant")]
#[command(about = "Route utterances to instant, fact, reasoning or multi-step answers")]
#[command(version)]
struct Args {
    /// Runtime configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Answer a single utterance and exit
    #[arg(long, value_name = "TEXT")]
    once: Option<String>,

    /// Print routing and session statistics as JSON before exiting
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if args.json_logs {
        config.logging.json = true;
    }

    let log_path = assistant_runtime::init_tracing(&config.logging)
        .context("failed to initialize logging")?;

    let backend = assistant_runtime::load_backend(&config).context("failed to load models")?;
    let mut catalog = ToolCatalog::new();
    register_builtin_tools(&mut catalog).context("failed to register built-in tools")?;
    let controller =
        ExecutionController::new(config, backend, catalog).context("invalid configuration")?;

    let session = controller.start_session();
    tracing::info!(session_id = %session.session_id, "cli session started");

    match args.once {
        Some(text) => {
            let result = controller.execute(&text).await?;
            print_result(&result);
        }
        None => {
            eprintln!("logs: {}", log_path.display());
            eprintln!("commands: /stats /session /end /quit");
            repl(&controller).await?;
        }
    }

    if args.stats {
        println!("{}", serde_json::to_string_pretty(&controller.get_routing_stats())?);
    }

    let summary = controller.end_session().await;
    if !summary.is_empty() {
        eprintln!("session ended: {}", summary.summary_text);
    }
    Ok(())
}

async fn repl(controller: &ExecutionController) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            break;
        };

        match line.trim() {
            "/quit" | "/exit" => break,
            "/stats" => {
                println!("{}", serde_json::to_string_pretty(&controller.get_routing_stats())?);
            }
            "/session" => {
                println!("{}", serde_json::to_string_pretty(&controller.get_session_stats())?);
            }
            "/end" => {
                let summary = controller.end_session().await;
                println!("{}", serde_json::to_string_pretty(&summary)?);
                let next = controller.start_session();
                println!("new session {}", next.session_id);
            }
            text => match controller.execute(text).await {
                Ok(result) => print_result(&result),
                Err(ControllerError::Busy) => println!("(busy, try again)"),
                Err(e) => return Err(e.into()),
            },
        }
    }
    Ok(())
}

fn print_result(result: &ExecutionResult) {
    println!("{}", result.response_text);
    let escalated = if result.escalations() > 0 {
        format!(", {} escalation(s)", result.escalations())
    } else {
        String::new()
    };
    println!("  [{} · {}ms{}]", result.tier_used, result.latency_ms, escalated);
}
