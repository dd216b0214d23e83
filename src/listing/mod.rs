use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use std::fmt;
use tracing::debug;

use crate::config::Config;

pub mod parser;

pub use parser::{parse_listing, TableError};

static PRE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("pre").expect("valid pre selector"));

/// Anything that can hand back the raw text of the patch listing.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch(&self) -> Result<String>;
}

/// Fetches the patch index over HTTP and keeps only its first `<pre>` block.
#[derive(Clone)]
pub struct HttpListingSource {
    http: Client,
    url: Url,
}

impl fmt::Debug for HttpListingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpListingSource")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl HttpListingSource {
    pub fn new(url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("vim-patches/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, url })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let url = Url::parse(&cfg.source.url).context("invalid source.url")?;
        Self::new(url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ListingSource for HttpListingSource {
    async fn fetch(&self) -> Result<String> {
        let res = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.url))?;
        if !res.status().is_success() {
            return Err(anyhow!("listing fetch error {} for {}", res.status(), self.url));
        }
        let body = res.text().await.context("failed to read listing body")?;
        debug!(bytes = body.len(), url = %self.url, "fetched listing");
        extract_pre_text(&body).ok_or_else(|| anyhow!("no <pre> block in {}", self.url))
    }
}

/// Text content of the first `<pre>` element, entities decoded and tags dropped.
pub fn extract_pre_text(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&PRE_SELECTOR)
        .next()
        .map(|pre| pre.text().collect::<String>())
}
