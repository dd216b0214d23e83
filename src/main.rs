use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use vim_patches::config;
use vim_patches::db;
use vim_patches::listing::HttpListingSource;
use vim_patches::notify::{self, RoomNotifier};
use vim_patches::sync::{self, Syncer};

#[derive(Debug, Parser)]
#[command(author, version, about = "Watch the Vim patch index and announce new patches")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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

    // Without a usable store there is nothing to serve.
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool)
        .await
        .context("failed to migrate entry store")?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let notifier = RoomNotifier::from_config(&cfg)?;
    let dispatcher = tokio::spawn(notify::run_dispatcher(events_rx, notifier));

    let source = HttpListingSource::from_config(&cfg)?;
    let syncer = Arc::new(Syncer::new(pool, Box::new(source), events_tx));

    let (stop_tx, stop_rx) = watch::channel(false);
    let (pull_tx, pull_rx) = mpsc::channel(1);
    let signals = tokio::spawn(forward_signals(pull_tx, stop_tx));

    let schedule = tokio::spawn(sync::run_schedule(
        syncer.clone(),
        cfg.app.poll_interval(),
        stop_rx.clone(),
    ));

    info!(source = %cfg.source.url, "watching patch index");
    sync::serve_pulls(&syncer, pull_rx, stop_rx).await;

    info!("shutting down");
    if let Err(err) = schedule.await {
        error!(?err, "sync schedule task failed");
    }
    // Dropping the last sender lets the dispatcher drain and exit.
    drop(syncer);
    if let Err(err) = dispatcher.await {
        error!(?err, "notification dispatcher task failed");
    }
    signals.await?
}

/// SIGHUP queues an on-demand pull; SIGINT requests shutdown. Both handlers
/// are installed once and stay subscribed while a pull is running.
#[cfg(unix)]
async fn forward_signals(pulls: mpsc::Sender<()>, stop: watch::Sender<bool>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    loop {
        tokio::select! {
            _ = hangup.recv() => {
                if pulls.try_send(()).is_err() {
                    info!("on-demand pull already queued");
                }
            }
            _ = interrupt.recv() => {
                let _ = stop.send(true);
                return Ok(());
            }
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(_pulls: mpsc::Sender<()>, stop: watch::Sender<bool>) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    let _ = stop.send(true);
    Ok(())
}
