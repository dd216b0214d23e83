use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;

use vim_patches::config;
use vim_patches::db;
use vim_patches::listing::HttpListingSource;
use vim_patches::notify::{self, RoomNotifier};
use vim_patches::sync::Syncer;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one sync pass against the patch index, announce new patches and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Persist new patches without announcing them.
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.app.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let dispatcher = if args.quiet {
        drop(events_rx);
        None
    } else {
        let notifier = RoomNotifier::from_config(&cfg)?;
        Some(tokio::spawn(notify::run_dispatcher(events_rx, notifier)))
    };

    let source = HttpListingSource::from_config(&cfg)?;
    let syncer = Syncer::new(pool, Box::new(source), events_tx);
    let ack = syncer.pull().await;
    println!("{ack}");

    drop(syncer);
    if let Some(dispatcher) = dispatcher {
        let delivered = dispatcher.await?;
        info!(delivered, "announcements sent");
    }
    Ok(())
}
