//! Command-line interface for relsync
//!
//! ```bash
//! # Sync everything in the public schema
//! relsync --from postgres://localhost/src --to postgres://localhost/dst
//!
//! # Sync a group defined in .relsync.yml, stop on the first failure
//! relsync nightly --fail-fast
//!
//! # All-or-nothing batch with deferred constraints
//! relsync public.orders public.order_items --defer-constraints
//! ```
//!
//! Exit codes: 0 on success, 1 when the batch (or its consistency
//! envelope) fails, 2 for usage, configuration, and precondition errors.

use clap::Parser;
use tracing::info;

use relsync::config::ConfigFile;
use relsync::orchestrator::summary_line;
use relsync::{BatchOrchestrator, BatchSummary, Cli, EffectiveOptions, SyncError};

#[tokio::main]
async fn main() {
    // Logs and progress go to stderr; stdout is reserved for the worker
    // result protocol.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.worker {
        if let Err(e) = relsync::job::worker_main().await {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
        return;
    }

    match run(cli).await {
        Ok(summary) => info!("{}", summary_line(&summary)),
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<SyncError>()
                .map(SyncError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<BatchSummary> {
    let config = ConfigFile::load(cli.config.as_deref())?;
    let options = EffectiveOptions::resolve(&cli, &config)?;
    BatchOrchestrator::new(options, config).run(&cli.tables).await
}
