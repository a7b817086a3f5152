//! quire: inspect and validate agent prompt definitions
//!
//! Runs the prompt engine against agent definitions and conversations stored
//! as JSON, printing the assembled model input or the post-response state.

mod config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quire_prompt::{
    AgentHandlerContext, AgentInstanceMessage, AgentPromptDescription, ContinueRoundResult,
    FlatPrompt, PromptNode, Response,
};
use serde::Serialize;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::Config;

/// Inspect and validate agent prompt definitions
#[derive(Parser)]
#[command(name = "quire")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .quire directory (default: search for .quire/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to daily files in this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble the model input for an agent and a conversation
    Concat {
        /// Agent definition JSON file
        #[arg(long)]
        agent: PathBuf,

        /// Conversation JSON file (array of messages, current message first)
        #[arg(long)]
        messages: PathBuf,

        /// Wait for background modifications and print the settled tree
        #[arg(long)]
        settle: bool,
    },

    /// Fill response placeholders and decide whether to continue
    Respond {
        /// Agent definition JSON file
        #[arg(long)]
        agent: PathBuf,

        /// File holding the raw model output
        #[arg(long)]
        response: PathBuf,
    },

    /// Check an agent definition and the loaded configuration
    Validate {
        /// Agent definition JSON file
        #[arg(long)]
        agent: PathBuf,
    },

    /// Initialize a new .quire directory with config file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConcatReport {
    flat_prompts: Vec<FlatPrompt>,
    processed_prompts: Vec<PromptNode>,
    /// Background modifications still pending when the tree was captured.
    pending: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RespondReport {
    responses: Vec<Response>,
    continue_round: ContinueRoundResult,
}

fn env_filter(verbose: bool, level: &str) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }
}

/// Initialize logging to stderr, keeping stdout for command output.
fn init_logging(verbose: bool, level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter(verbose, level))
        .init();
}

/// Initialize logging to rotating files with daily rotation.
fn init_file_logging(logs_dir: &Path, verbose: bool, level: &str) {
    if let Err(e) = std::fs::create_dir_all(logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        init_logging(verbose, level);
        return;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, "quire.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard would stop logging.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(env_filter(verbose, level))
        .init();
}

/// Load config from an explicit path or by discovery.
///
/// Runs before logging is initialized, so failures are reported on stderr.
fn load_config(override_path: Option<&PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    if let Some(path) = override_path {
        let config_file = if path.is_dir() {
            path.join(config::CONFIG_FILE)
        } else {
            path.clone()
        };
        let quire_dir = config_file.parent().unwrap_or(path).to_path_buf();
        let config = Config::from_file(&config_file)?;
        return Ok((config, Some(quire_dir)));
    }

    match Config::find_and_load() {
        Ok(Some((config, quire_dir))) => Ok((config, Some(quire_dir))),
        Ok(None) => Ok((Config::default(), None)),
        Err(e) => {
            eprintln!("Warning: Error searching for config: {}, using defaults", e);
            Ok((Config::default(), None))
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} file: {}", what, path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} file: {}", what, path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# quire configuration
# All paths are relative to this .quire/ directory unless absolute

[logging]
level = "info"  # Options: "trace", "debug", "info", "warn", "error"
# directory = "logs"  # Write daily log files to .quire/logs/

# Workspaces listed by retrieval tool lists
# [[workspaces]]
# id = "notes"
# name = "Notes"
# wiki_folder_location = "/path/to/wiki"

# Tiddlers served to the wiki-search tool and tidgi:// URIs
# [[tiddlers]]
# workspace = "notes"
# title = "Getting Started"
# text = "..."

# Fixed outputs for function modifications, keyed by function id
[functions]

# Fixed outputs for protocol-server modifications, keyed by server id
[mcp]
"#;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_dir) = load_config(cli.config.as_ref())?;
    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| config.resolve_log_dir(config_dir.as_deref()));
    match &log_dir {
        Some(dir) => init_file_logging(dir, cli.verbose, &config.logging.level),
        None => init_logging(cli.verbose, &config.logging.level),
    }
    if let Some(dir) = &config_dir {
        info!("Found config at {}", dir.display());
    }

    match cli.command {
        Commands::Concat {
            agent,
            messages,
            settle,
        } => {
            let agent: AgentPromptDescription = read_json(&agent, "agent")?;
            let messages: Vec<AgentInstanceMessage> = read_json(&messages, "messages")?;
            let engine = config.build_engine();

            let output = engine.prompt_concat(&agent, &messages).await;
            let pending = if settle {
                output.deferred.settle().await;
                0
            } else {
                // Unsettled tasks are left detached.
                output.deferred.len()
            };

            print_json(&ConcatReport {
                flat_prompts: output.flat_prompts,
                processed_prompts: output.processed_prompts.snapshot(),
                pending,
            })?;
        }

        Commands::Respond { agent, response } => {
            let agent: AgentPromptDescription = read_json(&agent, "agent")?;
            let llm_response = std::fs::read_to_string(&response)
                .with_context(|| format!("Failed to read response file: {}", response.display()))?;
            let engine = config.build_engine();

            let responses = engine.response_concat(&agent, &llm_response).await;
            let ctx = AgentHandlerContext::new(agent.id.clone(), Vec::new());
            let continue_round = engine.continue_round(&agent, &llm_response, &ctx).await;
            info!(
                continue_round = continue_round.continue_round,
                reason = continue_round.reason.as_deref().unwrap_or(""),
                "Continue-round decision"
            );

            print_json(&RespondReport {
                responses,
                continue_round,
            })?;
        }

        Commands::Validate { agent } => {
            let agent: AgentPromptDescription = read_json(&agent, "agent")?;

            let mut problems: Vec<String> = config
                .validate()
                .iter()
                .map(|e| format!("config {}", e))
                .collect();
            problems.extend(agent.validate().iter().map(|e| format!("agent {}", e)));

            if problems.is_empty() {
                println!("Agent '{}' is valid.", agent.id);
            } else {
                for problem in &problems {
                    println!("{}", problem);
                }
                anyhow::bail!("{} validation problem(s) found", problems.len());
            }
        }

        Commands::Init { force } => {
            use config::{CONFIG_FILE, QUIRE_DIR};

            let quire_dir = PathBuf::from(QUIRE_DIR);
            let config_path = quire_dir.join(CONFIG_FILE);

            if config_path.exists() && !force {
                anyhow::bail!(".quire/config.toml already exists. Use --force to overwrite.");
            }

            if !quire_dir.exists() {
                std::fs::create_dir_all(&quire_dir)?;
                info!("Created {}/", quire_dir.display());
            }

            std::fs::write(&config_path, DEFAULT_CONFIG)?;
            info!("Created {}", config_path.display());
        }
    }

    Ok(())
}
