//! Engine Bot CLI - thin harness around the `engine` crate.
//!
//! Concrete transports, providers, and storage backends are out of scope
//! for this binary; it exists to exercise configuration loading and to run
//! the router pipeline against in-memory mocks so the crate is runnable
//! end to end without external services.

#![allow(clippy::print_stdout)]

mod error;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use engine::channel::{ChannelTransport, ChatKind, InboundMessage};
use engine::config::{self, BotConfig, IssueLevel};
use engine::mock::{EchoProvider, InMemoryTransport};
use engine::provider::Provider;
use engine::router::resolve::{AgentConfig, AgentFactory, AgentRegistry, RoutingPredicate};
use engine::router::{Router, RouterConfig};
use engine::tool::registry::ToolRegistry;
use error::{BotError, Result};
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "engine-bot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path.
    #[arg(short, long, env = "ENGINE_BOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved configuration and a one-shot mock conversation.
    Status,
    /// Manage configuration.
    Config(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the configuration file contents.
    Show,
    /// Print the configuration file path.
    Path,
    /// Validate the configuration file.
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("engine_bot={level},engine={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(verbosity >= 2).init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Status => cmd_status(cli.config).await,
        Commands::Config(args) => cmd_config(args, cli.config).await,
    }
}

async fn resolved_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(config::config_path)
}

async fn read_config(path: &PathBuf) -> Result<BotConfig> {
    if !path.exists() {
        return Ok(BotConfig::default());
    }
    config::load_from(path).await.map_err(|e| BotError::config(e.to_string()))
}

/// Builds a single default agent wired to the in-memory echo provider and
/// transport, then runs one message through the full router pipeline.
async fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let config_file = resolved_config_path(config_path).await;
    let config = read_config(&config_file).await.unwrap_or_default();

    println!("Engine Bot Status\n");
    println!("Configuration:");
    println!("  Path:   {}", config_file.display());
    println!("  Exists: {}", if config_file.exists() { "yes" } else { "no" });
    println!("  Valid:  {}", if config.is_valid() { "yes" } else { "no" });
    println!();
    println!("Agents configured: {}", config.agents.len());
    println!("Plugins declared:  {}", config.plugins.len());
    println!();

    let agent = AgentConfig {
        id: "default".to_string(),
        workspace_path: PathBuf::new(),
        data_dir: PathBuf::new(),
        provider_id: "mock".to_string(),
        tools: vec![],
        routing: RoutingPredicate {
            default: true,
            ..Default::default()
        },
        loop_overrides: None,
        memory_enabled: false,
        cron_overrides: HashMap::new(),
    };
    let registry = AgentRegistry::build(vec![agent]).map_err(BotError::from)?;
    let factory = AgentFactory::new(registry, Arc::new(ToolRegistry::new()));

    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    providers.insert("mock".to_string(), Arc::new(EchoProvider::default()));

    let transport = Arc::new(InMemoryTransport::default());
    let mut transports: HashMap<String, Arc<dyn ChannelTransport>> = HashMap::new();
    transports.insert("cli".to_string(), transport.clone());

    let router = Router::new(RouterConfig::default(), factory, providers, transports);
    router
        .handle_inbound(InboundMessage {
            channel_id: "cli".to_string(),
            sender_id: "operator".to_string(),
            sender_name: None,
            chat_id: "status".to_string(),
            chat_kind: ChatKind::Dm,
            thread_id: None,
            text: "ping".to_string(),
            attachments: vec![],
            received_at: chrono::Utc::now(),
        })
        .await
        .map_err(BotError::from)?;

    let sent = transport.sent.lock().await;
    if let Some((_, reply)) = sent.last() {
        println!("Mock round-trip: \"{reply}\"");
    }

    Ok(())
}

async fn cmd_config(args: ConfigArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config_file = resolved_config_path(config_path).await;

    match args.command {
        ConfigCommands::Path => {
            println!("{}", config_file.display());
        }
        ConfigCommands::Show => {
            if config_file.exists() {
                let content = tokio::fs::read_to_string(&config_file)
                    .await
                    .map_err(|e| BotError::ReadConfig { path: config_file.clone(), source: e })?;
                println!("{content}");
            } else {
                println!("Configuration file does not exist.");
                println!("Path: {}", config_file.display());
            }
        }
        ConfigCommands::Validate => {
            if !config_file.exists() {
                println!("error: configuration file does not exist");
                return Ok(());
            }
            match read_config(&config_file).await {
                Ok(config) => {
                    let issues = config.validate();
                    if issues.is_empty() {
                        println!("Configuration is valid");
                    } else {
                        for issue in &issues {
                            println!("{issue}");
                        }
                        if issues.iter().any(|i| i.level == IssueLevel::Error) {
                            println!("Configuration has errors");
                        } else {
                            println!("Configuration is valid (with warnings)");
                        }
                    }
                }
                Err(e) => println!("error: {e}"),
            }
        }
    }

    Ok(())
}
