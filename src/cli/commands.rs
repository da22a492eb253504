//! CLI command definitions and handlers

use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::core::client::QianwenProvider;
use crate::core::config::TranslatorConfig;
use crate::core::context::OrchestrationContext;
use crate::core::health::HealthMonitor;
use crate::core::models::{Priority, ServiceType, TranslationRequest};
use crate::core::orchestrator::TranslationOrchestrator;
use crate::core::provider::TranslationProvider;
use crate::core::registry::HealthStatus;

/// Commands for the translation orchestrator
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Translate a single text
    Translate {
        /// Text to translate
        #[arg(short, long)]
        text: String,

        /// Source language (default: auto)
        #[arg(long, default_value = "auto")]
        from: String,

        /// Target language (default: zh)
        #[arg(long, default_value = "zh")]
        to: String,
    },

    /// Translate a file line by line
    Batch {
        /// Input file, one text per line
        #[arg(short, long)]
        file: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Source language (default: auto)
        #[arg(long, default_value = "auto")]
        from: String,

        /// Target language (default: zh)
        #[arg(long, default_value = "zh")]
        to: String,

        /// Batch priority: low, normal, high, critical
        #[arg(long, default_value = "normal")]
        priority: Priority,
    },

    /// Start HTTP API server
    Server {
        /// Bind address (default: 0.0.0.0)
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Listen port (default: 8000)
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
    },

    /// Run one health check against every configured service
    Health,

    /// Write a default configuration file
    InitConfig {
        /// Destination (.yaml or .json)
        #[arg(short, long, default_value = "translator.yaml")]
        output: PathBuf,
    },
}

fn providers(config: &TranslatorConfig) -> anyhow::Result<Vec<(ServiceType, Arc<dyn TranslationProvider>)>> {
    let qianwen: Arc<dyn TranslationProvider> = Arc::new(QianwenProvider::new(config)?);
    Ok(vec![(ServiceType::Qianwen, qianwen)])
}

/// Handle single text translation
pub async fn handle_translate(
    config: TranslatorConfig,
    text: String,
    from: String,
    to: String,
) -> anyhow::Result<()> {
    let context = OrchestrationContext::start(config.clone(), providers(&config)?).await?;
    let result = context.orchestrator().translate(&text, &from, &to).await;
    context.shutdown().await;

    println!("{}", result?);
    Ok(())
}

/// Handle file translation
pub async fn handle_batch(
    config: TranslatorConfig,
    file: PathBuf,
    output: Option<PathBuf>,
    from: String,
    to: String,
    priority: Priority,
) -> anyhow::Result<()> {
    let start_time = Instant::now();

    let content = std::fs::read_to_string(&file)?;
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        anyhow::bail!("No text found in {}", file.display());
    }

    info!("Starting batch translation");
    info!("Input: {}", file.display());
    info!("Lines: {}", lines.len());
    info!("Target language: {}", to);

    let chunk_size = (config.batch.max_batch_size * config.batch.max_concurrency).max(1);
    let context = OrchestrationContext::start(config.clone(), providers(&config)?).await?;

    // Create progress bar
    let pb = ProgressBar::new(lines.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("=>-"),
    );

    let mut translated = Vec::with_capacity(lines.len());
    let mut failed = 0;

    for chunk in lines.chunks(chunk_size) {
        let requests: Vec<TranslationRequest> = chunk
            .iter()
            .map(|line| TranslationRequest::new(*line, from.as_str(), to.as_str()).with_priority(priority))
            .collect();

        let results = context
            .orchestrator()
            .translate_batch_detailed(&requests, priority)
            .await;

        for (line, result) in chunk.iter().zip(results) {
            match result {
                Ok(text) => translated.push(text),
                Err(e) => {
                    failed += 1;
                    pb.set_message(format!("Failed: {}", e));
                    eprintln!("Error translating '{}': {}", line, e);
                    translated.push(line.to_string());
                }
            }
        }
        pb.inc(chunk.len() as u64);
    }

    pb.finish_with_message("Completed");
    let report = context.orchestrator().performance_report().await;
    context.shutdown().await;

    let joined = translated.join("\n");
    match &output {
        Some(path) => std::fs::write(path, joined + "\n")?,
        None => println!("{}", joined),
    }

    let duration = start_time.elapsed();
    info!(
        "Completed: {} translated, {} failed in {:?}",
        lines.len() - failed,
        failed,
        duration
    );

    eprintln!("\n✅ Batch translation completed!");
    eprintln!("   Translated: {}", lines.len() - failed);
    eprintln!("   Failed: {}", failed);
    eprintln!("   Level: {}", report.level);
    eprintln!("   Time: {:?}", duration);

    Ok(())
}

/// Handle HTTP server command
pub async fn handle_server(config: TranslatorConfig, host: String, port: u16) -> anyhow::Result<()> {
    use crate::server::api::run_server;

    info!("Starting HTTP server on {}:{}", host, port);
    println!("🚀 Server starting on http://{}:{}", host, port);

    run_server(config, host, port).await?;

    Ok(())
}

/// Handle health check command
pub async fn handle_health(config: TranslatorConfig) -> anyhow::Result<()> {
    let orchestrator = TranslationOrchestrator::new(&config)?;
    for (service_type, provider) in providers(&config)? {
        orchestrator.register_service(service_type, provider).await;
    }

    let monitor = HealthMonitor::new(orchestrator.registry().clone(), config.health.clone());
    let results = monitor.check_all_services().await;

    let mut unhealthy = 0;
    for (service_type, status) in &results {
        match status {
            HealthStatus::Healthy { response_time } => {
                println!("✅ {}: healthy ({:?})", service_type, response_time)
            }
            HealthStatus::Unhealthy { error } => {
                unhealthy += 1;
                println!("❌ {}: {}", service_type, error)
            }
            HealthStatus::Unknown => println!("❔ {}: unknown", service_type),
        }
    }

    if unhealthy > 0 {
        anyhow::bail!("{} of {} services unhealthy", unhealthy, results.len());
    }
    Ok(())
}

/// Handle configuration scaffolding
pub async fn handle_init_config(output: PathBuf) -> anyhow::Result<()> {
    if output.exists() {
        anyhow::bail!("{} already exists", output.display());
    }
    TranslatorConfig::default().to_file(&output)?;
    println!("✅ Wrote default configuration to {}", output.display());
    Ok(())
}
