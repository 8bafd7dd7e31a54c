//! Thin CLI driver over the engine (SPEC_FULL.md §6.2). The binary owns no
//! album-tree invariants; it resolves configuration, wires up the network
//! collaborator, and calls into `mirror_engine`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mirror_engine::config::Config;
use mirror_engine::remote::HttpRemoteApi;
use mirror_engine::resources::{resolve_trust_token, SharedResources};
use mirror_engine::store::LibraryStore;
use mirror_engine::sync::{load_local_summary, never_cancel, SyncEngine};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mirror-engine")]
#[command(about = "One-way mirror of a remote photo service into a local on-disk tree")]
struct Cli {
    /// Path to a TOML config file (falls back to environment variables).
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one full engine pass: fetch, diff, apply.
    Sync,
    /// Load local state only and print a summary, without touching the network.
    Status,
    /// Flatten the stash into permanent archived entries without a full sync.
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(config.log_level.as_tracing_level().into())
                .from_env_lossy(),
        )
        .init();

    let store = Arc::new(LibraryStore::open(&config.data_dir).context("opening the library store")?);

    match cli.command {
        Commands::Status => {
            let summary = load_local_summary(&store)?;
            println!(
                "{} assets, {} albums ({:?})",
                summary.asset_count, summary.album_count, summary.albums_by_kind
            );
        }
        Commands::Clean => {
            let promoted = store.clean_archived_orphans()?;
            println!("promoted {promoted} orphaned stash entries");
        }
        Commands::Sync => {
            // Resolves the same way `SharedResources::build` would (config
            // override, else whatever the resource file already persisted)
            // so a token obtained by a prior run still works here.
            let trust_token = resolve_trust_token(&config)?
                .context("no trust_token configured or persisted; the login/MFA handshake is out of scope for this engine")?;
            // The remote base URL is transport plumbing, not one of the
            // recognized engine options in spec.md §6 — it lives outside
            // `Config` the same way auth/MFA does.
            let base_url = std::env::var("MIRROR_REMOTE_URL")
                .context("MIRROR_REMOTE_URL environment variable is required to reach the remote service")?;
            let network = Arc::new(HttpRemoteApi::new(base_url, trust_token));

            let resources = SharedResources::setup(config, network)?;
            let engine = SyncEngine::new(resources, store);

            let report = engine.run(never_cancel()).await?;
            println!(
                "sync complete: {} added, {} failed, {} removed, {} albums applied, {} removed, {} stashed, {} orphans promoted",
                report.assets_added,
                report.assets_failed,
                report.assets_removed,
                report.albums_applied,
                report.albums_removed,
                report.albums_stashed,
                report.orphans_promoted,
            );
        }
    }

    Ok(())
}
