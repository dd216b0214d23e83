//! Configuration loader and validator for the patch watcher.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable consulted when `notify.secret` is left empty.
pub const SECRET_ENV: &str = "VIM_PATCHES_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub source: Source,
    pub notify: Notify,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

/// Where the patch listing is scraped from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub url: String,
}

/// Chat room the bot announces new patches to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notify {
    pub endpoint: String,
    pub room: String,
    pub bot: String,
    #[serde(default)]
    pub secret: String,
}

fn default_poll_interval_secs() -> u64 {
    600
}

impl App {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Default SQLite URL under the data directory.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}/patches.db", self.data_dir.trim_end_matches('/'))
    }
}

impl Notify {
    /// The configured secret, falling back to `VIM_PATCHES_SECRET`.
    pub fn resolved_secret(&self) -> String {
        if !self.secret.is_empty() {
            return self.secret.clone();
        }
        std::env::var(SECRET_ENV).unwrap_or_default()
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_secs must be > 0"));
    }

    if cfg.source.url.trim().is_empty() {
        return Err(ConfigError::Invalid("source.url must be non-empty"));
    }
    if Url::parse(&cfg.source.url).is_err() {
        return Err(ConfigError::Invalid("source.url must be a valid URL"));
    }

    if Url::parse(&cfg.notify.endpoint).is_err() {
        return Err(ConfigError::Invalid("notify.endpoint must be a valid URL"));
    }
    if cfg.notify.room.trim().is_empty() {
        return Err(ConfigError::Invalid("notify.room must be non-empty"));
    }
    if cfg.notify.bot.trim().is_empty() {
        return Err(ConfigError::Invalid("notify.bot must be non-empty"));
    }
    // An empty secret is allowed; it is resolved from the environment at startup.

    Ok(())
}

/// Returns a sample configuration pointing at the upstream patch index.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_secs: 600

source:
  url: "http://ftp.vim.org/vim/unstable/patches/7.4a/"

notify:
  endpoint: "http://lingr.com/api/room/say"
  room: "vim"
  bot: "vim_jp"
  secret: ""
"#
}
