//! Scrape-and-sync orchestrator.
//!
//! `Syncer` owns the entry store behind one async mutex, so a pass, an
//! on-demand pull and a feed read never overlap.
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, mpsc::UnboundedSender, watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::db::{self, Pool};
use crate::listing::{parse_listing, ListingSource, TableError};
use crate::model::{Entry, EntryPersisted, SyncReport};

/// Body returned to whoever asked for an on-demand pull.
pub const PULL_ACK: &str = "OK";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to fetch listing: {0:#}")]
    Fetch(anyhow::Error),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("entry store error: {0:#}")]
    Store(anyhow::Error),
}

pub struct Syncer {
    store: Mutex<Pool>,
    source: Box<dyn ListingSource>,
    events: UnboundedSender<EntryPersisted>,
}

impl Syncer {
    pub fn new(
        pool: Pool,
        source: Box<dyn ListingSource>,
        events: UnboundedSender<EntryPersisted>,
    ) -> Self {
        Self {
            store: Mutex::new(pool),
            source,
            events,
        }
    }

    /// Run one pass: fetch, parse, insert new rows in a single transaction,
    /// then publish one event per inserted entry once the commit succeeded.
    #[instrument(skip_all)]
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let pool = self.store.lock().await;

        let text = self.source.fetch().await.map_err(SyncError::Fetch)?;
        let rows = parse_listing(&text)?;

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| SyncError::Store(e.into()))?;
        let mut inserted = Vec::new();
        for row in &rows {
            let created_at = Utc::now();
            let is_new = db::insert_if_absent(&mut tx, &row.name, &row.title, "", created_at)
                .await
                .map_err(SyncError::Store)?;
            if is_new {
                inserted.push(Entry {
                    name: row.name.clone(),
                    title: row.title.clone(),
                    description: String::new(),
                    created_at,
                });
            }
        }
        tx.commit().await.map_err(|e| SyncError::Store(e.into()))?;

        for entry in &inserted {
            if self
                .events
                .send(EntryPersisted {
                    entry: entry.clone(),
                })
                .is_err()
            {
                debug!(name = %entry.name, "no notification dispatcher listening");
            }
        }

        Ok(SyncReport {
            seen: rows.len(),
            inserted,
        })
    }

    /// On-demand trigger. The outcome is logged; the caller always gets `PULL_ACK`.
    pub async fn pull(&self) -> &'static str {
        log_outcome("pull", self.sync().await);
        PULL_ACK
    }

    /// Feed read: newest entries first. Waits for any in-flight pass.
    pub async fn list_recent(&self, limit: u32) -> anyhow::Result<Vec<Entry>> {
        let pool = self.store.lock().await;
        db::list_recent(&pool, limit).await
    }
}

fn log_outcome(trigger: &'static str, outcome: Result<SyncReport, SyncError>) {
    match outcome {
        Ok(report) => info!(
            trigger,
            seen = report.seen,
            inserted = report.inserted.len(),
            skipped = report.skipped(),
            "sync pass finished"
        ),
        Err(err) => warn!(trigger, error = %err, "sync pass aborted"),
    }
}

/// Timer loop: one pass every `every`, the first one `every` after start.
/// Stops between passes once `shutdown` flips to `true`.
pub async fn run_schedule(syncer: Arc<Syncer>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = every.as_secs(), "sync schedule started");
    loop {
        tokio::select! {
            _ = ticker.tick() => log_outcome("timer", syncer.sync().await),
            changed = shutdown.changed() => {
                let stopped = changed.is_err() || *shutdown.borrow();
                if stopped {
                    break;
                }
            }
        }
    }
    info!("sync schedule stopped");
}

/// Run one pull per request on `pulls` until `shutdown` flips to `true`.
///
/// A shutdown raised while a pull is in flight is honoured as soon as that
/// pull returns.
pub async fn serve_pulls(
    syncer: &Syncer,
    mut pulls: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let stopped = *shutdown.borrow_and_update();
        if stopped {
            break;
        }
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            request = pulls.recv() => match request {
                Some(()) => {
                    let ack = syncer.pull().await;
                    info!(ack, "on-demand pull served");
                }
                None => break,
            },
        }
    }
    debug!("on-demand pulls stopped");
}
