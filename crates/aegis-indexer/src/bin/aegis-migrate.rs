//! Offline re-embedding migration
//!
//! Moves the corpus from the old vector dimension to the new one:
//! re-embed all chunks into a fresh collection, swap the canonical
//! name onto it, then refresh the auxiliary embedding columns.

use aegis_common::Config;
use aegis_indexer::migration::{Migration, MigrationFlags};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "aegis-migrate", about = "Re-embed the document corpus into a new vector collection")]
struct Args {
    /// Simulate the migration without making changes
    #[arg(long)]
    dry_run: bool,

    /// Resume from the stored checkpoint
    #[arg(long)]
    resume: bool,

    /// Skip the collection swap phase
    #[arg(long)]
    skip_swap: bool,

    /// Only perform the collection swap
    #[arg(long)]
    swap_only: bool,

    /// Only re-embed the auxiliary embedding columns
    #[arg(long)]
    spaces_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    info!("Embedding migration starting");
    info!(
        "  Collection: {} -> {}_v2 ({}d)",
        config.vector.collection, config.vector.collection, config.vector.vector_size
    );
    info!("  Batch size: {}", config.migration.batch_size);
    info!("  Checkpoint: {}", config.migration.checkpoint_file.display());

    let migration = Migration::new(config).await?;
    if let Err(e) = migration.check_services().await {
        error!("Service check failed. Ensure all services are running: {}", e);
        std::process::exit(1);
    }

    let flags = MigrationFlags {
        dry_run: args.dry_run,
        resume: args.resume,
        skip_swap: args.skip_swap,
        swap_only: args.swap_only,
        spaces_only: args.spaces_only,
    };
    if let Err(e) = migration.run(flags).await {
        error!("Migration failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
