//! Shipgate - hook entry points for the completion gate.
//!
//! Each subcommand maps to one host workflow hook. The trigger payload is
//! read as JSON from stdin and the decision is printed as JSON on stdout;
//! logging goes to stderr so it never corrupts the decision stream. A
//! malformed payload approves: the gate must never itself be the reason a
//! workflow cannot proceed.

use anyhow::Result;
use clap::{Parser, Subcommand};
use shipgate_core::{Decision, Gate, GateConfig, HookEvent, TrackingStore, Workspace};
use std::io::Read;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Shipgate - validate, verify, and publish before the workflow stops.
#[derive(Parser, Debug)]
#[command(name = "shipgate")]
#[command(version = "0.1.0")]
#[command(about = "Completion gate for autonomous coding workflows.", long_about = None)]
struct Cli {
    /// Working-tree root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: HookCommand,
}

#[derive(Subcommand, Debug)]
enum HookCommand {
    /// Gate a finished work chunk: validate, update progress, auto-commit
    Chunk,
    /// Gate the overall stop: validate and verify ship criteria
    Stop,
    /// Update phase token counts and display elapsed time and cost
    Track,
    /// Inject progress and plan context when a session resumes
    SessionStart,
    /// Start phase timers on recognized workflow commands
    Prompt,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let root = cli
        .root
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let config = GateConfig::new(root);

    let mut raw = String::new();
    let _ = std::io::stdin().read_to_string(&mut raw);

    let event = match HookEvent::from_json(raw.trim()) {
        Ok(event) => event,
        Err(err) => {
            // Fail open on a malformed trigger payload.
            warn!(%err, "malformed trigger payload, approving");
            emit(&Decision::approve());
            return Ok(());
        }
    };

    let decision = match cli.command {
        HookCommand::Chunk => Gate::new(config).on_chunk_complete(&event).await,
        HookCommand::Stop => Gate::new(config).on_session_stop(&event).await,
        HookCommand::Track => TrackingStore::new(&config).on_stop(&event),
        HookCommand::SessionStart => {
            if event.stop_hook_active {
                Decision::approve()
            } else {
                match Workspace::new(&config).session_context().await {
                    Some(context) => Decision::approve_with(context),
                    None => Decision::approve(),
                }
            }
        }
        HookCommand::Prompt => TrackingStore::new(&config).on_prompt(&event),
    };

    emit(&decision);
    Ok(())
}

fn emit(decision: &Decision) {
    println!("{}", decision.to_json());
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
