//! Main entry point for the translation orchestrator CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use translation_orchestrator::cli::commands::{self, Commands};
use translation_orchestrator::TranslatorConfig;

/// Translation orchestrator - cached, batched and self-healing translation
#[derive(Parser, Debug)]
#[command(name = "translation-orchestrator", version, about, long_about = None)]
struct Args {
    /// Configuration file (.yaml, .json or .toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API key for Qianwen (optional, defaults to DASHSCOPE_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    let crate_target = env!("CARGO_PKG_NAME").replace('-', "_");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}={}", crate_target, log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = TranslatorConfig::load(args.config.as_deref())?;

    // Override config with CLI args if provided
    if let Some(api_key) = args.api_key {
        config.api_key = api_key;
    }

    // Execute command
    match args.command {
        Some(Commands::Translate { text, from, to }) => {
            commands::handle_translate(config, text, from, to).await?;
        }
        Some(Commands::Batch {
            file,
            output,
            from,
            to,
            priority,
        }) => {
            commands::handle_batch(config, file, output, from, to, priority).await?;
        }
        Some(Commands::Server { host, port }) => {
            commands::handle_server(config, host, port).await?;
        }
        Some(Commands::Health) => {
            commands::handle_health(config).await?;
        }
        Some(Commands::InitConfig { output }) => {
            commands::handle_init_config(output).await?;
        }
        None => {
            println!("Please specify a command. Use --help for more information.");
        }
    }

    Ok(())
}
