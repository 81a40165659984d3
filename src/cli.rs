//! Command-line interface.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{find_default_config, Config};
use crate::mcp::stdio::StdioTransport;
use crate::server::{serve, AppState};
use crate::{DEFAULT_PORT, VERSION};

/// llmock: offline mock LLM API server
#[derive(Parser, Debug)]
#[command(name = "llmock")]
#[command(version = VERSION)]
#[command(about = "Mock OpenAI/Anthropic/Gemini/MCP server for testing LLM clients")]
pub struct Cli {
    /// Enable JSON log output
    #[arg(long, global = true, env = "LLMOCK_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the mock server
    #[command(alias = "s")]
    Serve(ServeCommand),

    /// Validate a configuration file
    Validate {
        /// Configuration file to check
        file: PathBuf,
    },

    /// Show version information
    Version,
}

/// Start the mock server
#[derive(Parser, Debug)]
pub struct ServeCommand {
    /// Port to listen on (overrides config and the PORT variable)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to a config file (YAML or JSON); llmock.yaml / llmock.json
    /// are picked up automatically
    #[arg(short, long, env = "LLMOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Deterministic random seed
    #[arg(long, env = "LLMOCK_SEED")]
    pub seed: Option<u64>,

    /// Delay between streamed token chunks in milliseconds (0 disables)
    #[arg(long)]
    pub token_delay_ms: Option<u64>,

    /// Disable the /_mock admin API and the MCP control plane
    #[arg(long)]
    pub no_admin: bool,

    /// Auto-generate tool calls from request schemas when no rule fires
    #[arg(long)]
    pub auto_tool_calls: bool,

    /// Markov training corpus file
    #[arg(long)]
    pub corpus: Option<PathBuf>,

    /// Log every request
    #[arg(short, long)]
    pub verbose: bool,

    /// Run the MCP control plane over newline-delimited JSON-RPC on
    /// stdin/stdout alongside the HTTP server
    #[arg(long)]
    pub control_stdio: bool,
}

/// Execute the parsed CLI command.
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve(cmd) => execute_serve(cmd, cli.json_logs).await,
        Commands::Validate { file } => execute_validate(file),
        Commands::Version => {
            println!("llmock {VERSION}");
            Ok(())
        }
    }
}

async fn execute_serve(cmd: ServeCommand, json_logs: bool) -> Result<()> {
    let mut config = load_config(&cmd)?;

    // Flag overrides.
    if let Some(port) = cmd.port {
        config.server.port = port;
    }
    if let Some(seed) = cmd.seed {
        config.defaults.seed = Some(seed);
    }
    if let Some(ms) = cmd.token_delay_ms {
        config.defaults.token_delay_ms = Some(ms);
    }
    if cmd.no_admin {
        config.server.admin_api = Some(false);
    }
    if cmd.auto_tool_calls {
        config.defaults.auto_tool_calls = true;
    }
    if let Some(corpus) = &cmd.corpus {
        config.corpus_file = Some(corpus.clone());
    }
    if cmd.verbose {
        config.server.verbose = true;
    }

    crate::telemetry::init_telemetry(config.server.verbose, json_logs);

    // Port resolution: flag > config > PORT variable > default.
    let port = resolve_port(config.server.port);

    let rule_count = config.rules.len();
    let corpus_info = config
        .corpus_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "default".to_string());
    let admin_status = if config.admin_enabled() { "enabled" } else { "disabled" };

    let state = AppState::new(config).context("invalid configuration")?;

    if cmd.control_stdio {
        let Some(control) = state.control() else {
            bail!("--control-stdio requires the admin API (drop --no-admin)");
        };
        let transport = StdioTransport::new(control.clone());
        tokio::spawn(async move {
            let _ = transport
                .run(tokio::io::stdin(), tokio::io::stdout())
                .await;
        });
    }

    info!(
        port,
        rules = rule_count,
        corpus = %corpus_info,
        admin = admin_status,
        "llmock listening"
    );
    serve(state, port).await
}

fn load_config(cmd: &ServeCommand) -> Result<Config> {
    if let Some(path) = &cmd.config {
        return Config::from_file(path)
            .with_context(|| format!("loading config {}", path.display()));
    }
    if let Some(path) = find_default_config() {
        let config = Config::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?;
        info!(config = %path.display(), "loaded config");
        return Ok(config);
    }
    Ok(Config::default())
}

fn resolve_port(configured: u16) -> u16 {
    if configured > 0 {
        return configured;
    }
    if let Ok(value) = std::env::var("PORT") {
        if let Ok(port) = value.parse::<u16>() {
            if port > 0 {
                return port;
            }
        }
    }
    DEFAULT_PORT
}

fn execute_validate(file: PathBuf) -> Result<()> {
    let config =
        Config::from_file(&file).with_context(|| format!("loading config {}", file.display()))?;
    let _ = AppState::new(config).context("invalid configuration")?;
    println!("{}: OK", file.display());
    Ok(())
}
