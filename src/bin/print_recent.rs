use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use vim_patches::config;
use vim_patches::db;
use vim_patches::model::Entry;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Print the most recently seen patches as JSON, newest first"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// How many entries to print.
    #[arg(long, default_value_t = 10)]
    limit: u32,
}

/// Feed item shape: the patch name doubles as id and title, the listing
/// title becomes the description.
#[derive(Debug, Serialize)]
struct FeedItem {
    id: String,
    title: String,
    link: String,
    description: String,
    published: String,
}

impl FeedItem {
    fn from_entry(entry: Entry, base_url: &str) -> Self {
        Self {
            link: format!("{}{}", base_url, entry.name),
            id: entry.name.clone(),
            title: entry.name,
            description: entry.title,
            published: entry.created_at.to_rfc2822(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.app.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let items: Vec<FeedItem> = db::list_recent(&pool, args.limit)
        .await?
        .into_iter()
        .map(|entry| FeedItem::from_entry(entry, &cfg.source.url))
        .collect();
    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}
