//! Otelgate CLI
//!
//! Command-line interface for operating the otelgate collector.
//!
//! # Usage
//!
//! ```bash
//! otelgate --help
//! otelgate health --url http://localhost:4318
//! otelgate check-config collector.json
//! ```

#![deny(unsafe_code)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use shared::config::{CollectorConfig, PipelineConfig};
use shared::limiter::MemoryLimiter;
use shared::models::SignalKind;
use shared::processor::AttributeProcessor;
use std::path::{Path, PathBuf};

/// Otelgate CLI - telemetry collector command-line interface
#[derive(Debug, Parser)]
#[command(name = "otelgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch and print the server's health document
    Health {
        /// OTLP/HTTP base URL of the server
        #[arg(
            short,
            long,
            env = "OTELGATE_URL",
            default_value = "http://localhost:4318"
        )]
        url: String,
    },
    /// Validate a collector configuration file and print the effective settings
    CheckConfig {
        /// Path of the JSON configuration file
        path: PathBuf,
    },
}

/// Effective settings of one pipeline.
#[derive(Debug, Serialize)]
struct PipelineReport<'a> {
    signal: SignalKind,
    soft_limit_bytes: usize,
    hard_limit_bytes: usize,
    actions: Vec<&'static str>,
    #[serde(flatten)]
    config: &'a PipelineConfig,
}

fn pipeline_report(kind: SignalKind, config: &PipelineConfig) -> anyhow::Result<PipelineReport<'_>> {
    let limiter = MemoryLimiter::from_config(kind, &config.memory_limiter)
        .with_context(|| format!("{kind} memory limiter"))?;
    AttributeProcessor::new(&config.processor).with_context(|| format!("{kind} processor"))?;
    Ok(PipelineReport {
        signal: kind,
        soft_limit_bytes: limiter.soft_limit(),
        hard_limit_bytes: limiter.hard_limit(),
        actions: config.processor.actions.iter().map(|r| r.action.name()).collect(),
        config,
    })
}

fn check_config(path: &Path) -> anyhow::Result<serde_json::Value> {
    let config = CollectorConfig::from_file(path)?;
    let pipelines = [SignalKind::Traces, SignalKind::Metrics, SignalKind::Logs]
        .into_iter()
        .map(|kind| pipeline_report(kind, config.pipelines.get(kind)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(serde_json::json!({
        "resource": config.resource,
        "pipelines": pipelines,
        "auth": config.auth,
        "exporter": config.exporter,
        "shutdown_grace_ms": u64::try_from(config.shutdown_grace.as_millis()).unwrap_or(u64::MAX),
    }))
}

async fn health(url: &str) -> anyhow::Result<serde_json::Value> {
    let endpoint = format!("{}/health", url.trim_end_matches('/'));
    let response = reqwest::get(&endpoint)
        .await
        .with_context(|| format!("failed to reach {endpoint}"))?
        .error_for_status()?;
    Ok(response.json().await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Health { url }) => {
            tracing::debug!(%url, "Checking health");
            let document = health(&url).await?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Some(Commands::CheckConfig { path }) => {
            let report = check_config(&path)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            eprintln!("{} is valid", path.display());
        }
        None => {
            println!("Otelgate CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
