//! # OutClaw — Multi-Tenant Outreach Orchestration Core
//!
//! Runs the long-lived service loops: the enrichment waterfall resolver and
//! the paced email dispatch queue. The orchestration primitives (throttler
//! registry, working-hours gate, sequencer, fanout) are library surfaces in
//! `outclaw-scheduler`, wired by the embedding application against its own
//! executor and catalog.
//!
//! Usage:
//!   outclaw                      # Start with ~/.outclaw/config.toml
//!   outclaw --config ./dev.toml  # Custom config
//!   outclaw --init-config        # Write the default config and exit

use anyhow::Result;
use clap::Parser;
use outclaw_channels::{SmtpChannel, spawn_email_queue};
use outclaw_core::config::{OutClawConfig, expand_home};
use outclaw_core::traits::EnrichProvider;
use outclaw_enrich::{HttpProvider, SnapshotStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "outclaw",
    version,
    about = "🦞 OutClaw — Multi-Tenant Outreach Orchestration Core"
)]
struct Cli {
    /// Config file path (default: ~/.outclaw/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the default config to ~/.outclaw/config.toml and exit
    #[arg(long)]
    init_config: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "outclaw=debug,outclaw_scheduler=debug,outclaw_enrich=debug,outclaw_channels=debug,outclaw_platform=debug"
    } else {
        "outclaw=info,outclaw_scheduler=info,outclaw_enrich=info,outclaw_channels=info,outclaw_platform=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    if cli.init_config {
        let config = OutClawConfig::default();
        config.save()?;
        println!("✅ Default config written to {}", OutClawConfig::default_path().display());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => OutClawConfig::load_from(path)?,
        None => OutClawConfig::load()?,
    };

    tracing::info!("🦞 OutClaw starting");

    let providers: Vec<Arc<dyn EnrichProvider>> = config
        .enrich
        .providers
        .iter()
        .map(|p| Arc::new(HttpProvider::new(p)) as Arc<dyn EnrichProvider>)
        .collect();
    if providers.is_empty() {
        tracing::warn!("⚠️ No enrichment providers configured");
    }
    let store = SnapshotStore::new(expand_home(&config.enrich.snapshot_path));
    let _resolver = outclaw_enrich::resolver::spawn(providers, store, config.enrich.iteration_budget);

    let _email = if config.email.enabled {
        let transport = Arc::new(SmtpChannel::new(&config.email)?);
        Some(spawn_email_queue(
            transport,
            expand_home(&config.email.snapshot_path),
            config.email.pacing_secs,
        ))
    } else {
        tracing::info!("📪 Email dispatch disabled");
        None
    };

    tracing::info!("✅ OutClaw ready — press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutting down");
    Ok(())
}
