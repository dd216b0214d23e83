//! Chat room announcements for newly persisted patches.
//!
//! Delivery is best effort: a failed request is logged and dropped, never
//! retried, and never affects the sync pass that produced the entry.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use sha1::{Digest, Sha1};
use std::fmt;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::model::{Entry, EntryPersisted};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn announce(&self, entry: &Entry) -> Result<()>;
}

/// Posts to a Lingr-style `room/say` endpoint authenticated with a bot verifier.
#[derive(Clone)]
pub struct RoomNotifier {
    http: Client,
    endpoint: Url,
    room: String,
    bot: String,
    verifier: String,
}

impl fmt::Debug for RoomNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomNotifier")
            .field("endpoint", &self.endpoint)
            .field("room", &self.room)
            .field("bot", &self.bot)
            .finish_non_exhaustive()
    }
}

/// Lowercase hex SHA-1 of `bot` followed by `secret`.
pub fn bot_verifier(bot: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bot.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Message body: patch name on the first line, its title on the second.
pub fn message_text(entry: &Entry) -> String {
    format!("{}\n{}", entry.name, entry.title)
}

impl RoomNotifier {
    pub fn new(endpoint: Url, room: String, bot: String, secret: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("vim-patches/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        let verifier = bot_verifier(&bot, secret);
        Ok(Self {
            http,
            endpoint,
            room,
            bot,
            verifier,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let endpoint = Url::parse(&cfg.notify.endpoint).context("invalid notify.endpoint")?;
        let secret = cfg.notify.resolved_secret();
        if secret.is_empty() {
            warn!("notify secret is empty; room posts will likely be rejected");
        }
        Self::new(
            endpoint,
            cfg.notify.room.clone(),
            cfg.notify.bot.clone(),
            &secret,
        )
    }

    pub fn build_request(&self, entry: &Entry) -> Result<reqwest::Request> {
        self.http
            .get(self.endpoint.clone())
            .query(&[
                ("room", self.room.as_str()),
                ("bot", self.bot.as_str()),
                ("text", message_text(entry).as_str()),
                ("bot_verifier", self.verifier.as_str()),
            ])
            .build()
            .context("failed to build room request")
    }
}

#[async_trait]
impl Notifier for RoomNotifier {
    async fn announce(&self, entry: &Entry) -> Result<()> {
        let request = self.build_request(entry)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach room endpoint")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("room endpoint error {}: {}", status, body));
        }
        Ok(())
    }
}

/// Consume `EntryPersisted` events until every sender is dropped.
///
/// Returns how many announcements were delivered successfully.
#[instrument(skip_all)]
pub async fn run_dispatcher<N>(mut events: UnboundedReceiver<EntryPersisted>, notifier: N) -> usize
where
    N: Notifier,
{
    let mut delivered = 0;
    while let Some(EntryPersisted { entry }) = events.recv().await {
        match notifier.announce(&entry).await {
            Ok(()) => {
                delivered += 1;
                debug!(name = %entry.name, "announced patch");
            }
            Err(err) => warn!(?err, name = %entry.name, "announcement failed; dropping"),
        }
    }
    info!(delivered, "notification dispatcher stopped");
    delivered
}
