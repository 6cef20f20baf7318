//! auto-coder CLI entry point

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use auto_coder::adapters::{ConsoleApproval, ConsoleObserver, Session};
use auto_coder::agent::{Conversation, OpenAiCompatibleClient};
use auto_coder::auth::AuthMode;
use auto_coder::config::{self, Config};
use auto_coder::tools::{CommandApproval, DenyDangerous, ToolRegistry};
use auto_coder::ui;

#[derive(Parser)]
#[command(name = "auto-coder")]
#[command(about = "Conversational coding assistant for OpenAI-compatible endpoints")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Prompt to run once; starts the interactive session when omitted
    prompt: Vec<String>,

    /// Config file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Chat completion endpoint base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Model name
    #[arg(short, long)]
    model: Option<String>,

    /// API key for static key authentication
    #[arg(long)]
    api_key: Option<String>,

    /// Directory the tools operate in
    #[arg(short = 'C', long)]
    working_dir: Option<PathBuf>,

    /// Maximum tool-calling iterations per turn
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Wait for complete responses instead of streaming them
    #[arg(long)]
    no_stream: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a config file interactively
    Init,

    /// Show the resolved configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they never mix with answers
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Init) => {
            let path = config::init(cli.config.as_deref())?;
            println!("\nNext steps:");
            println!("  1. Review {:?}", path);
            println!("  2. Chat: auto-coder \"list the files in this project\"");
        }

        Some(Commands::Status) => {
            let config = load_config(&cli)?;
            print_status(&config, cli.config.as_deref())?;
        }

        None => run(&cli).await?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = config::load(cli.config.as_deref())?;

    if let Some(url) = &cli.base_url {
        config.llm.base_url = url.clone();
    }
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(key) = &cli.api_key {
        config.llm.api_key = Some(key.clone());
    }
    if let Some(n) = cli.max_iterations {
        config.max_iterations = n;
    }
    if let Some(dir) = &cli.working_dir {
        config.working_dir = dir.clone();
    }
    if cli.no_stream {
        config.llm.stream = false;
    }

    config.working_dir = config
        .working_dir
        .canonicalize()
        .with_context(|| format!("Working directory {:?} is not accessible", config.working_dir))?;

    Ok(config)
}

fn auth_mode(config: &Config) -> AuthMode {
    AuthMode::select(&config.auth, config.llm.api_key.is_some())
}

async fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;

    let client = OpenAiCompatibleClient::from_config(&config)?;
    let observer = Arc::new(ConsoleObserver::new());

    // Flagged commands are refused outright when there is no prompt to ask at
    let approval: Arc<dyn CommandApproval> = if cli.prompt.is_empty() {
        Arc::new(ConsoleApproval::new(observer.clone()))
    } else {
        Arc::new(DenyDangerous)
    };
    let tools = ToolRegistry::new_with_defaults(&config.working_dir, config.timeout()?, approval);
    let conversation = Conversation::for_workspace(&config.working_dir, config.system_prompt.as_deref());

    tracing::info!(
        "Using {} at {} ({} auth, {} tools, streaming {})",
        config.llm.model,
        config.llm.base_url,
        auth_mode(&config),
        tools.len(),
        config.llm.stream
    );

    let mut session = Session::new(client, tools, config.max_iterations, conversation, observer);

    if !cli.prompt.is_empty() {
        let prompt = cli.prompt.join(" ");
        match session.run_once(&prompt).await {
            Ok(response) => session.observer().render_response(&response),
            Err(e) => {
                ui::print_error(e.kind(), &e.to_string());
                return Err(e.into());
            }
        }
        return Ok(());
    }

    ui::print_banner(
        &config.llm.model,
        &config.llm.base_url,
        &auth_mode(&config).to_string(),
        &config.working_dir,
        session.correlation_id(),
    );
    session.run_interactive().await?;
    Ok(())
}

fn print_status(config: &Config, explicit: Option<&Path>) -> Result<()> {
    ui::print_header("Status", env!("CARGO_PKG_VERSION"));

    let source = explicit
        .map(Path::to_path_buf)
        .or_else(|| config::search_paths().into_iter().find(|p| p.exists()));
    match source {
        Some(path) => ui::print_step(&format!("Config file: {:?}", path)),
        None => ui::print_step("Config file: none (defaults and environment)"),
    }

    ui::print_step(&format!("Base URL: {}", config.llm.base_url));
    ui::print_step(&format!("Model: {}", config.llm.model));
    ui::print_step(&format!("Auth mode: {}", auth_mode(config)));
    ui::print_step(&format!(
        "API key: {}",
        if config.llm.api_key.is_some() { "set" } else { "not set" }
    ));
    if !config.llm.custom_headers.is_empty() {
        let names: Vec<&str> = config.llm.custom_headers.keys().map(String::as_str).collect();
        ui::print_step(&format!("Custom headers: {}", names.join(", ")));
    }
    ui::print_step(&format!("Working directory: {:?}", config.working_dir));
    ui::print_step(&format!("Max iterations: {}", config.max_iterations));
    ui::print_step(&format!("Timeout: {}s", config.llm.timeout));
    ui::print_step(&format!("Streaming: {}", if config.llm.stream { "on" } else { "off" }));

    let tools = ToolRegistry::new_with_defaults(&config.working_dir, config.timeout()?, Arc::new(DenyDangerous));
    ui::print_step(&format!("Tools: {}", tools.tool_names().join(", ")));
    Ok(())
}
