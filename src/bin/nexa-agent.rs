//! Nexa Agent Binary
//!
//! Runs one agent runtime over stdio. Each stdin line is an inbound chat event,
//! either a JSON `InboundEvent` or plain text. Every outbound agent message is
//! printed to stdout as one JSON line. Logs go to stderr unless configured
//! otherwise.

use anyhow::{bail, Context};
use clap::Parser;
use nexa_agent::config::{ConfigLoader, NexaConfig, StorageBackend};
use nexa_agent::logging::init_logging;
use nexa_agent::provider::HttpProviderClient;
use nexa_agent::store::{ConversationStore, MemoryStore, SledStore};
use nexa_agent::types::new_message_id;
use nexa_agent::{AgentHandle, AgentRuntime, InboundEvent, RuntimeDeps, ServerType};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "nexa-agent", version, about = "Project Manager agent over stdio")]
struct Cli {
    /// Workspace root directory
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Provider server type (lmStudio, ollama)
    #[arg(long, value_parser = parse_server_type)]
    server_type: Option<ServerType>,

    /// Provider base URL
    #[arg(long)]
    api_url: Option<String>,

    /// Requested model name
    #[arg(long)]
    model: Option<String>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    log_format: Option<String>,

    /// Keep conversation state in memory only
    #[arg(long)]
    memory: bool,
}

fn parse_server_type(value: &str) -> Result<ServerType, String> {
    match value.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
        "lmstudio" => Ok(ServerType::LmStudio),
        "ollama" => Ok(ServerType::Ollama),
        other => Err(format!("unknown server type '{}' (lmStudio or ollama)", other)),
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        error!("nexa-agent failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    init_logging(Some(&config.logging)).context("Failed to initialize logging")?;
    info!(
        server_type = %config.provider.server_type,
        api_url = %config.provider.api_url,
        model = %config.provider.model,
        "nexa-agent starting"
    );

    let store = open_store(&config, cli.memory)?;
    let provider = HttpProviderClient::new(config.runtime.request_timeout())
        .context("Failed to build provider client")?;
    let handle = AgentRuntime::spawn(&config, RuntimeDeps::new(Arc::new(provider), store));

    let printer = tokio::spawn(print_events(handle.clone()));

    let report = handle
        .initialize(None)
        .await
        .context("Agent initialization failed")?;
    if report.verified {
        info!(model = %report.settings.model(), "Agent ready");
    } else {
        warn!(
            failures = ?report.failures,
            "Agent ready in best-effort mode, provider settings are unverified"
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => handle_line(&handle, line.trim()).await,
                None => {
                    info!("stdin closed, finishing queued messages");
                    let limit = config.runtime.request_timeout() * 2;
                    if let Err(e) = handle.wait_for_completion(Some(limit)).await {
                        warn!(error = %e, "Queued messages did not finish before shutdown");
                    }
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await;
    drop(handle);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<NexaConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load(&cli.workspace)?,
    };

    if let Some(server_type) = cli.server_type {
        config.provider.server_type = server_type;
    }
    if let Some(api_url) = &cli.api_url {
        config.provider.api_url = api_url.clone();
    }
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }
    if cli.memory {
        config.storage.backend = StorageBackend::Memory;
    }

    if let Err(errors) = config.validate() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!("Invalid configuration:\n  {}", details.join("\n  "));
    }
    Ok(config)
}

fn open_store(config: &NexaConfig, memory: bool) -> anyhow::Result<Arc<dyn ConversationStore>> {
    if memory || config.storage.backend == StorageBackend::Memory {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let path = &config.storage.path;
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create store directory {}", path.display()))?;
    let store = SledStore::open(path)
        .with_context(|| format!("Failed to open store at {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn handle_line(handle: &AgentHandle, line: &str) {
    match line {
        "" => {}
        "/clear" => match handle.clear_history().await {
            Ok(()) => info!("Conversation history cleared"),
            Err(e) => warn!(error = %e, "Failed to clear history"),
        },
        "/stats" => match handle.stats().await {
            Ok(stats) => match serde_json::to_string(&stats) {
                Ok(json) => eprintln!("{}", json),
                Err(e) => warn!(error = %e, "Failed to encode stats"),
            },
            Err(e) => warn!(error = %e, "Failed to read stats"),
        },
        _ => {
            let event = if line.starts_with('{') {
                match serde_json::from_str::<InboundEvent>(line) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Ignoring malformed inbound event");
                        return;
                    }
                }
            } else {
                InboundEvent::new(new_message_id(), line)
            };
            let message_id = event.message_id.clone();
            let admission = handle.submit(event).await;
            info!(message_id = %message_id, admission = ?admission, "Inbound message");
        }
    }
}

async fn print_events(handle: AgentHandle) {
    let mut events = handle.events();
    drop(handle);
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!(error = %e, "Failed to encode outbound event"),
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Output fell behind, skipped events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
